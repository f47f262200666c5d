//! In-memory card simulator for tests.
//!
//! ## Why a manual fake instead of a mocking crate?
//!
//! The A0 exchange is computed, not scripted: the card's reply depends on
//! the random nonce the client just sent, so a fake has to run the card
//! side of the key derivation itself. Expectation-based mocks cannot
//! express that.
//!
//! [`FakeCard`] is cheaply cloneable; every clone shares the same card
//! state, so a test can hand one clone to the worker under test and keep
//! another as a probe for counters and failure injection.

use std::{collections::VecDeque, sync::Arc, thread, time::Duration};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::{
    apdu::ApduResponse,
    port::{PortError, PortResult, SmartCardPort},
};

#[derive(Debug)]
struct CardState {
    master_key: [u8; 32],
    card_nonce: [u8; 8],
    ecm_response: [u8; 32],
    reply_sw: u16,
    truncate_data: Option<usize>,
    corrupt_a0_tags: usize,
    pending_errors: VecDeque<PortError>,
    transmit_delay: Option<Duration>,
    refuse_connect: bool,
    initialized: bool,
    connected: bool,
    in_transaction: bool,
    transactions_begun: usize,
    transactions_ended: usize,
    transmit_count: usize,
    a0_count: usize,
    ecm_count: usize,
    session_key: Option<[u8; 32]>,
    last_ecm: Option<Vec<u8>>,
}

impl CardState {
    fn reply_a0(&mut self, data: &[u8]) -> PortResult<Vec<u8>> {
        if data.len() != 16 {
            return Err(PortError::Transport(format!(
                "A0 data must be 16 bytes, got {}",
                data.len()
            )));
        }
        self.a0_count += 1;
        let a0_init = &data[8..16];

        let mut hasher = Sha256::new();
        hasher.update(self.master_key);
        hasher.update(a0_init);
        hasher.update(self.card_nonce);
        let kcl: [u8; 32] = hasher.finalize().into();

        let mut hasher = Sha256::new();
        hasher.update(kcl);
        hasher.update(a0_init);
        let mut tag: [u8; 32] = hasher.finalize().into();

        if self.corrupt_a0_tags > 0 {
            self.corrupt_a0_tags -= 1;
            tag[0] ^= 0xFF;
        } else {
            self.session_key = Some(kcl);
        }

        let mut reply = vec![0u8; 6];
        reply.extend_from_slice(&self.card_nonce);
        reply.extend_from_slice(&tag);
        Ok(reply)
    }

    fn reply_ecm(&mut self, data: &[u8]) -> PortResult<Vec<u8>> {
        self.ecm_count += 1;
        self.last_ecm = Some(data.to_vec());

        let mut reply = vec![0u8; 6];
        reply.extend_from_slice(&self.ecm_response);
        Ok(reply)
    }
}

/// Simulated ACAS card behind the [`SmartCardPort`] trait.
#[derive(Clone, Debug)]
pub struct FakeCard {
    state: Arc<Mutex<CardState>>,
}

impl FakeCard {
    #[must_use]
    pub fn new(master_key: [u8; 32]) -> Self {
        Self {
            state: Arc::new(Mutex::new(CardState {
                master_key,
                card_nonce: [0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18],
                ecm_response: [0u8; 32],
                reply_sw: 0x9000,
                truncate_data: None,
                corrupt_a0_tags: 0,
                pending_errors: VecDeque::new(),
                transmit_delay: None,
                refuse_connect: false,
                initialized: false,
                connected: false,
                in_transaction: false,
                transactions_begun: 0,
                transactions_ended: 0,
                transmit_count: 0,
                a0_count: 0,
                ecm_count: 0,
                session_key: None,
                last_ecm: None,
            })),
        }
    }

    #[must_use]
    pub fn with_card_nonce(self, nonce: [u8; 8]) -> Self {
        self.state.lock().card_nonce = nonce;
        self
    }

    /// Script the 32-byte mixing value returned for ECM requests.
    pub fn set_ecm_response(&self, response: [u8; 32]) {
        self.state.lock().ecm_response = response;
    }

    /// Corrupt the authentication tag of the next `count` A0 replies.
    pub fn corrupt_next_a0_tags(&self, count: usize) {
        self.state.lock().corrupt_a0_tags = count;
    }

    /// Queue a transport error; each queued error consumes one transmit.
    /// Reset-like errors also drop the connection, as a real reader would.
    pub fn inject_transport_error(&self, err: PortError) {
        self.state.lock().pending_errors.push_back(err);
    }

    /// Stall every transmit by `delay` (worker-starvation tests).
    pub fn set_transmit_delay(&self, delay: Duration) {
        self.state.lock().transmit_delay = Some(delay);
    }

    /// Make `connect` fail, simulating an absent reader.
    pub fn refuse_connect(&self, refuse: bool) {
        self.state.lock().refuse_connect = refuse;
    }

    /// Answer with this status word instead of 0x9000.
    pub fn set_reply_sw(&self, sw: u16) {
        self.state.lock().reply_sw = sw;
    }

    /// Cap reply data fields at `cap` bytes (short-response tests).
    pub fn truncate_replies(&self, cap: Option<usize>) {
        self.state.lock().truncate_data = cap;
    }

    /// Kcl as computed on the card side of the last honest A0 exchange.
    #[must_use]
    pub fn session_key(&self) -> Option<[u8; 32]> {
        self.state.lock().session_key
    }

    #[must_use]
    pub fn a0_exchanges(&self) -> usize {
        self.state.lock().a0_count
    }

    #[must_use]
    pub fn ecm_exchanges(&self) -> usize {
        self.state.lock().ecm_count
    }

    #[must_use]
    pub fn transmit_count(&self) -> usize {
        self.state.lock().transmit_count
    }

    /// ECM blob observed in the most recent 34 command.
    #[must_use]
    pub fn last_ecm(&self) -> Option<Vec<u8>> {
        self.state.lock().last_ecm.clone()
    }

    /// Every begun transaction was ended and none is open.
    #[must_use]
    pub fn transactions_balanced(&self) -> bool {
        let state = self.state.lock();
        state.transactions_begun == state.transactions_ended && !state.in_transaction
    }
}

impl SmartCardPort for FakeCard {
    fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    fn initialize(&mut self) -> PortResult<()> {
        self.state.lock().initialized = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn connect(&mut self) -> PortResult<()> {
        let mut state = self.state.lock();
        if state.refuse_connect {
            return Err(PortError::Transport("no reader attached".into()));
        }
        state.connected = true;
        Ok(())
    }

    fn begin_transaction(&mut self) -> PortResult<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(PortError::InvalidHandle);
        }
        if state.in_transaction {
            return Err(PortError::Transport("transaction already open".into()));
        }
        state.in_transaction = true;
        state.transactions_begun += 1;
        Ok(())
    }

    fn end_transaction(&mut self) {
        let mut state = self.state.lock();
        state.in_transaction = false;
        state.transactions_ended += 1;
    }

    fn transmit(&mut self, apdu: &[u8]) -> PortResult<ApduResponse> {
        let delay = self.state.lock().transmit_delay;
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut state = self.state.lock();
        state.transmit_count += 1;

        if let Some(err) = state.pending_errors.pop_front() {
            if err.is_retryable() {
                state.connected = false;
            }
            return Err(err);
        }
        if !state.connected {
            return Err(PortError::InvalidHandle);
        }
        if !state.in_transaction {
            return Err(PortError::Transport("transmit outside transaction".into()));
        }
        if apdu.len() < 6 {
            return Err(PortError::Transport("malformed APDU".into()));
        }
        let lc = apdu[4] as usize;
        if apdu.len() != 6 + lc {
            return Err(PortError::Transport("APDU length mismatch".into()));
        }
        let data = &apdu[5..5 + lc];

        let mut reply = match apdu[1] {
            0xA0 => state.reply_a0(data)?,
            0x34 => state.reply_ecm(data)?,
            ins => {
                return Err(PortError::Transport(format!("unsupported INS 0x{ins:02X}")));
            }
        };

        if let Some(cap) = state.truncate_data {
            reply.truncate(cap);
        }
        let [sw1, sw2] = state.reply_sw.to_be_bytes();
        Ok(ApduResponse::from_parts(reply, sw1, sw2))
    }
}
