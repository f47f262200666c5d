//! # kagura-cas
//!
//! The conditional-access middle layer: receives ECMs from the
//! demultiplexer, resolves them through the smart card on a dedicated
//! worker thread, and descrambles MMTP payloads on the caller's thread
//! without ever stalling on the card for a key it already holds.
//!
//! ## Threading
//!
//! [`Descrambler`] is used from one fast-path thread (`on_ecm` +
//! `decrypt`); it owns the ECM worker internally and joins it on drop.
//!
//! ## Key coherence
//!
//! The published odd/even pair is replaced atomically under a dedicated
//! lock, and a parity flip on incoming packets forces the fast path to
//! drain pending ECMs (bounded wait) before serving the new half — a
//! stale key is never served across a crypto-period boundary.

#![forbid(unsafe_code)]

mod descrambler;
mod frame;

pub use descrambler::{Descrambler, DEFAULT_KEY_SWITCH_TIMEOUT};
pub use frame::{EncryptionFlag, MmtpFrame, MMTP_HEADER_LEN};
