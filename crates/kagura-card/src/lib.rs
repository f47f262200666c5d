//! # kagura-card
//!
//! Smart-card access for the conditional-access core.
//!
//! ## Goal
//!
//! Talk to the ACAS access-control card over an abstract APDU transport and
//! turn Entitlement Control Messages into control-word pairs, **without**
//! depending on any concrete reader driver. PC/SC (or a recorded-trace
//! replay) plugs in behind [`SmartCardPort`].
//!
//! ## Public contract
//!
//! - [`SmartCardPort`] — polymorphic APDU transport with scoped transactions.
//! - [`AcasCard`] — the card client: session-key derivation, ECM resolution,
//!   bounded retry on reset-like transport failures.
//! - [`DecryptionKey`] — the odd/even control-word pair one ECM resolves to.
//!
//! ## Debugging
//!
//! `AcasCard` emits `tracing` logs at `trace`/`debug` level, including the
//! hex of derived key material. Enable with e.g. `RUST_LOG=kagura_card=trace`.

#![forbid(unsafe_code)]

mod acas;
mod apdu;
mod error;
mod port;
pub mod testing;

pub use acas::{AcasCard, DecryptionKey};
pub use apdu::{ApduCommand, ApduResponse, SW_SUCCESS};
pub use error::{CardError, CardResult, RejectReason};
pub use port::{PortError, PortResult, ScopedTransaction, SmartCardPort};
