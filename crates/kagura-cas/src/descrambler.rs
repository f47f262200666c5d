//! ECM worker and the descrambling fast path.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use kagura_card::{AcasCard, DecryptionKey};
use kagura_crypt::AesCtrEngine;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::frame::{EncryptionFlag, MmtpFrame, MMTP_HEADER_LEN};

/// How long a parity flip may wait for the ECM worker to catch up before
/// the packet is reported undecryptable.
pub const DEFAULT_KEY_SWITCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Which control-word half a packet asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KeyParity {
    Even,
    Odd,
}

struct EcmQueue {
    items: VecDeque<Vec<u8>>,
    running: bool,
}

struct Shared {
    queue: Mutex<EcmQueue>,
    queue_cond: Condvar,
    current_key: Mutex<Option<DecryptionKey>>,
    ecm_seen: AtomicBool,
}

/// Conditional-access descrambler: ECM intake, key publication, and the
/// AES-CTR fast path.
///
/// One instance serves one stream from one fast-path thread. ECM
/// resolution runs on an internal worker so a smart-card transaction
/// (tens of milliseconds) never blocks packet processing.
pub struct Descrambler {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
    engine: AesCtrEngine,
    last_ecm: Option<Vec<u8>>,
    last_parity: Option<KeyParity>,
    key_switch_timeout: Duration,
}

impl std::fmt::Debug for Descrambler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Descrambler")
            .field("last_parity", &self.last_parity)
            .field("key_switch_timeout", &self.key_switch_timeout)
            .finish_non_exhaustive()
    }
}

impl Descrambler {
    /// Take ownership of the card client and start the ECM worker.
    #[must_use]
    pub fn new(card: AcasCard) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(EcmQueue {
                items: VecDeque::new(),
                running: true,
            }),
            queue_cond: Condvar::new(),
            current_key: Mutex::new(None),
            ecm_seen: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || ecm_worker(&worker_shared, card));

        Self {
            shared,
            worker: Some(worker),
            engine: AesCtrEngine::new(false),
            last_ecm: None,
            last_parity: None,
            key_switch_timeout: DEFAULT_KEY_SWITCH_TIMEOUT,
        }
    }

    /// Force the portable AES backend (no key-schedule cache).
    #[must_use]
    pub fn with_portable_aes(mut self, force: bool) -> Self {
        self.engine = AesCtrEngine::new(force);
        self
    }

    /// Scale the parity-flip wait; the default is
    /// [`DEFAULT_KEY_SWITCH_TIMEOUT`].
    #[must_use]
    pub fn with_key_switch_timeout(mut self, timeout: Duration) -> Self {
        self.key_switch_timeout = timeout;
        self
    }

    /// Accept one ECM from the demultiplexer.
    ///
    /// A byte-identical re-delivery of the previous ECM is dropped without
    /// touching the card; anything else is queued for the worker.
    pub fn on_ecm(&mut self, ecm: &[u8]) {
        if self.last_ecm.as_deref() == Some(ecm) {
            trace!(len = ecm.len(), "duplicate ECM ignored");
            return;
        }
        self.last_ecm = Some(ecm.to_vec());

        {
            let mut queue = self.shared.queue.lock();
            queue.items.push_back(ecm.to_vec());
        }
        self.shared.queue_cond.notify_one();
        self.shared.ecm_seen.store(true, Ordering::Release);
        debug!(len = ecm.len(), "ECM queued");
    }

    /// Decrypt one frame in place.
    ///
    /// Returns `false` when no key is available for the frame's parity
    /// (none published yet, or the worker did not catch up with a parity
    /// flip in time); the caller drops the frame. Unscrambled frames and
    /// payloads without ciphertext pass through untouched.
    pub fn decrypt(&mut self, frame: &mut MmtpFrame<'_>) -> bool {
        let parity = match frame.flag {
            EncryptionFlag::Unscrambled => return true,
            EncryptionFlag::Even => KeyParity::Even,
            EncryptionFlag::Odd => KeyParity::Odd,
        };

        let Some(key) = self.key_for(parity) else {
            return false;
        };

        if frame.payload.len() <= MMTP_HEADER_LEN {
            return true;
        }

        let iv = frame.counter_iv();
        trace!(
            packet_id = frame.packet_id,
            sequence_number = frame.sequence_number,
            len = frame.payload.len() - MMTP_HEADER_LEN,
            "descrambling payload"
        );
        self.engine
            .apply(&key, &iv, &mut frame.payload[MMTP_HEADER_LEN..]);
        true
    }

    /// Fetch the key half for `parity`, honoring the parity-flip rule:
    /// a flip marks a crypto-period boundary, so pending ECMs must be
    /// resolved before the new half is served.
    fn key_for(&mut self, parity: KeyParity) -> Option<[u8; 16]> {
        if !self.shared.ecm_seen.load(Ordering::Acquire) {
            return None;
        }

        if self.last_parity != Some(parity) {
            let deadline = Instant::now() + self.key_switch_timeout;
            let mut queue = self.shared.queue.lock();
            while !queue.items.is_empty() {
                if self
                    .shared
                    .queue_cond
                    .wait_until(&mut queue, deadline)
                    .timed_out()
                {
                    warn!(?parity, "key switch timed out waiting for ECM worker");
                    return None;
                }
            }
        }
        self.last_parity = Some(parity);

        let key = self.shared.current_key.lock();
        key.as_ref().map(|key| match parity {
            KeyParity::Even => key.even,
            KeyParity::Odd => key.odd,
        })
    }
}

impl Drop for Descrambler {
    fn drop(&mut self) {
        self.shared.queue.lock().running = false;
        self.shared.queue_cond.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn ecm_worker(shared: &Shared, mut card: AcasCard) {
    trace!("ECM worker started");
    loop {
        let ecm = {
            let mut queue = shared.queue.lock();
            loop {
                if !queue.running {
                    trace!("ECM worker stopping");
                    return;
                }
                if let Some(front) = queue.items.front() {
                    break front.clone();
                }
                shared.queue_cond.wait(&mut queue);
            }
        };

        match card.ecm(&ecm) {
            Ok(key) => {
                *shared.current_key.lock() = Some(key);
                debug!("control words published");
            }
            Err(err) => warn!(%err, "ECM resolution failed"),
        }

        // Pop only after publication so that an empty queue implies the
        // published key is current.
        shared.queue.lock().items.pop_front();
        shared.queue_cond.notify_all();
    }
}
