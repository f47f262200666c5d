//! Producer/consumer buffer rotation with spill-over preservation.

use std::{
    collections::VecDeque,
    io::Read,
    ops::Range,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use tracing::{trace, warn};

use crate::error::{IoError, IoResult};

/// Buffers in rotation. Three give the reader one buffer of slack on both
/// sides of the parser.
pub const NUM_BUFFERS: usize = 3;
/// Reserved head room for the unparsed tail of the previous buffer.
/// Typical straddles are a few KiB; 1 MiB absorbs pathological framing.
pub const SPILL_OVER_AREA_SIZE: usize = 1024 * 1024;
/// Fresh input read per rotation.
pub const NEW_DATA_AREA_SIZE: usize = 16 * 1024 * 1024;
/// Total allocation per buffer.
pub const BUFFER_SIZE: usize = SPILL_OVER_AREA_SIZE + NEW_DATA_AREA_SIZE;

/// Pipeline geometry. `Default` is the broadcast layout; tests shrink it
/// to exercise many rotations cheaply.
#[derive(Clone, Copy, Debug)]
pub struct PipelineOptions {
    pub num_buffers: usize,
    pub spill_over: usize,
    pub new_data: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            num_buffers: NUM_BUFFERS,
            spill_over: SPILL_OVER_AREA_SIZE,
            new_data: NEW_DATA_AREA_SIZE,
        }
    }
}

impl PipelineOptions {
    fn buffer_size(&self) -> usize {
        self.spill_over + self.new_data
    }
}

/// An owned buffer handed to the consumer; `bytes()` is the valid view
/// (carried spill-over followed by fresh input).
#[derive(Debug)]
pub struct FilledBuffer {
    buffer: Vec<u8>,
    len: usize,
}

impl FilledBuffer {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hand the buffer back, marking `remaining` (indexes into `bytes()`)
    /// as the unparsed tail to re-present at the head of the next buffer.
    /// The range is clipped to the valid view.
    #[must_use]
    pub fn finish(self, remaining: Range<usize>) -> ProcessedBuffer {
        let start = remaining.start.min(self.len);
        let end = remaining.end.clamp(start, self.len);
        ProcessedBuffer {
            buffer: self.buffer,
            remaining: start..end,
        }
    }
}

/// A buffer on its way back to the producer, together with the tail the
/// consumer could not parse.
#[derive(Debug)]
pub struct ProcessedBuffer {
    buffer: Vec<u8>,
    remaining: Range<usize>,
}

/// Triple-buffered read-ahead over a byte stream.
///
/// The producer thread owns the free list and the input stream; the
/// consumer thread alternates [`next_filled`](Self::next_filled) and
/// [`return_processed`](Self::return_processed). Dropping the pipeline
/// stops and joins the producer.
pub struct IoPipeline {
    filled_rx: kanal::Receiver<IoResult<FilledBuffer>>,
    processed_tx: kanal::Sender<ProcessedBuffer>,
    stop: Arc<AtomicBool>,
    producer: Option<thread::JoinHandle<()>>,
}

impl IoPipeline {
    /// Start the pipeline with the broadcast buffer layout.
    #[must_use]
    pub fn new(input: impl Read + Send + 'static) -> Self {
        Self::with_options(input, PipelineOptions::default())
    }

    #[must_use]
    pub fn with_options(input: impl Read + Send + 'static, options: PipelineOptions) -> Self {
        let (filled_tx, filled_rx) = kanal::bounded(options.num_buffers);
        let (processed_tx, processed_rx) = kanal::bounded(options.num_buffers);
        let stop = Arc::new(AtomicBool::new(false));

        let producer = Producer {
            input,
            options,
            free: (0..options.num_buffers)
                .map(|_| vec![0u8; options.buffer_size()])
                .collect(),
            filled_tx,
            processed_rx,
            stop: Arc::clone(&stop),
        };
        let handle = thread::spawn(move || producer.run());

        Self {
            filled_rx,
            processed_tx,
            stop,
            producer: Some(handle),
        }
    }

    /// Block until the next filled buffer is available.
    ///
    /// # Errors
    ///
    /// [`IoError::Eof`] once the stream is exhausted, [`IoError::Io`] if a
    /// read failed.
    pub fn next_filled(&self) -> IoResult<FilledBuffer> {
        match self.filled_rx.recv() {
            Ok(item) => item,
            Err(_) => Err(IoError::Eof),
        }
    }

    /// Return a processed buffer. Its remaining tail (at most the
    /// spill-over area) reappears at the head of the next filled buffer.
    pub fn return_processed(&self, processed: ProcessedBuffer) {
        // A closed channel means the producer already stopped; the buffer
        // is simply dropped then.
        let _ = self.processed_tx.send(processed);
    }
}

impl Drop for IoPipeline {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        // Closing both channels unblocks the producer wherever it waits.
        self.filled_rx.close();
        self.processed_tx.close();
        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
    }
}

struct Producer<R> {
    input: R,
    options: PipelineOptions,
    free: VecDeque<Vec<u8>>,
    filled_tx: kanal::Sender<IoResult<FilledBuffer>>,
    processed_rx: kanal::Receiver<ProcessedBuffer>,
    stop: Arc<AtomicBool>,
}

impl<R: Read> Producer<R> {
    fn run(mut self) {
        let mut first = true;

        while !self.stop.load(Ordering::Acquire) {
            let Some(mut buffer) = self.free.pop_front() else {
                // Unreachable with a well-behaved consumer: every report
                // returns exactly one buffer.
                warn!("buffer rotation exhausted");
                break;
            };

            // Wait for the consumer's report on its previous buffer and
            // recycle it. The first rotation has nothing to wait for.
            let mut leftover = 0;
            if first {
                first = false;
            } else {
                let report = match self.processed_rx.recv() {
                    Ok(report) => report,
                    Err(_) => break,
                };
                leftover = report.remaining.len().min(self.options.spill_over);
                let start = report.remaining.start;
                buffer[..leftover].copy_from_slice(&report.buffer[start..start + leftover]);
                self.free.push_back(report.buffer);
                if leftover < report.remaining.len() {
                    warn!(
                        reported = report.remaining.len(),
                        carried = leftover,
                        "remaining view exceeds the spill-over area, clamped"
                    );
                }
            }

            // Fill the new-data area after the carried tail.
            let target = leftover + self.options.new_data;
            let mut filled = leftover;
            let mut failure = None;
            while filled < target {
                match self.input.read(&mut buffer[filled..target]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }

            if let Some(err) = failure {
                warn!(%err, "input read failed");
                let _ = self.filled_tx.send(Err(IoError::Io(err)));
                break;
            }

            let bytes_read = filled - leftover;
            if bytes_read == 0 {
                // EOF. Whatever tail is still carried never became a full
                // frame and is dropped with the stream.
                trace!(leftover, "input stream exhausted");
                break;
            }

            trace!(leftover, bytes_read, "buffer filled");
            let item = FilledBuffer {
                buffer,
                len: filled,
            };
            if self.filled_tx.send(Ok(item)).is_err() {
                break;
            }
        }
        // Dropping the sender closes the filled queue: the consumer sees
        // EOF after draining pending buffers.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_clips_to_the_valid_view() {
        let filled = FilledBuffer {
            buffer: vec![0u8; 64],
            len: 32,
        };
        let processed = filled.finish(30..60);
        assert_eq!(processed.remaining, 30..32);
    }

    #[test]
    fn default_options_match_the_broadcast_layout() {
        let options = PipelineOptions::default();
        assert_eq!(options.num_buffers, 3);
        assert_eq!(options.buffer_size(), 17 * 1024 * 1024);
        assert_eq!(BUFFER_SIZE, SPILL_OVER_AREA_SIZE + NEW_DATA_AREA_SIZE);
    }
}
