//! # kagura-io
//!
//! Triple-buffered stream input for the descrambling pipeline.
//!
//! ## Goal
//!
//! Keep the parser fed with large owned buffers while a dedicated thread
//! reads ahead, **without** copying parsed data back when an MMTP frame
//! straddles a buffer boundary: the unparsed tail the consumer reports is
//! re-presented at the head of the next buffer.
//!
//! ## Ownership
//!
//! Buffers rotate between exactly one owner at a time — the producer, the
//! filled queue, or the consumer. The hand-off types are move-only, so
//! the rotation invariant is enforced by the type system.
//!
//! ## EOF semantics (normative)
//!
//! [`IoPipeline::next_filled`] returns [`IoError::Eof`] only after the
//! input stream reported end-of-file; a read failure is delivered once as
//! [`IoError::Io`] and then the pipeline is closed.

#![forbid(unsafe_code)]

mod error;
mod pipeline;

pub use error::{IoError, IoResult};
pub use pipeline::{
    FilledBuffer, IoPipeline, PipelineOptions, ProcessedBuffer, BUFFER_SIZE, NEW_DATA_AREA_SIZE,
    NUM_BUFFERS, SPILL_OVER_AREA_SIZE,
};
