//! Abstract APDU transport to the access-control card.

use thiserror::Error;

use crate::apdu::ApduResponse;

/// Transport-level failures, as distinct from the card answering with a
/// non-success status word (which is a successful transmit).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PortError {
    /// The card was reset or power-cycled; card-side session state is gone.
    #[error("card was reset")]
    ResetCard,

    /// The reader handle is no longer valid.
    #[error("card handle is invalid")]
    InvalidHandle,

    /// Any other transport failure; not retriable at this layer.
    #[error("transport error: {0}")]
    Transport(String),
}

impl PortError {
    /// Reset-like failures are worth a reconnect and another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResetCard | Self::InvalidHandle)
    }
}

pub type PortResult<T> = Result<T, PortError>;

/// Polymorphic APDU transport to an access-control smart card.
///
/// Implementations are swappable at runtime: a PC/SC reader in production,
/// [`testing::FakeCard`](crate::testing::FakeCard) in tests.
///
/// Normative:
/// - `initialize` and `connect` are idempotent; calling them while already
///   initialized/connected is a no-op.
/// - After a transmit fails with [`PortError::ResetCard`] or
///   [`PortError::InvalidHandle`], `is_connected()` must report `false`
///   until `connect` succeeds again.
/// - `begin_transaction`/`end_transaction` bracket exclusive access to the
///   card. Nesting is not required; use [`ScopedTransaction`] so the
///   release happens on every exit path.
pub trait SmartCardPort: Send {
    fn is_initialized(&self) -> bool;

    /// Process-level setup of the transport backend.
    fn initialize(&mut self) -> PortResult<()>;

    fn is_connected(&self) -> bool;

    /// Attach to the reader and power the card.
    fn connect(&mut self) -> PortResult<()>;

    fn begin_transaction(&mut self) -> PortResult<()>;

    fn end_transaction(&mut self);

    /// Send one APDU and return the parsed reply.
    fn transmit(&mut self, apdu: &[u8]) -> PortResult<ApduResponse>;
}

/// RAII guard releasing the card transaction on every exit path,
/// unwind included.
pub struct ScopedTransaction<'a> {
    port: &'a mut dyn SmartCardPort,
}

impl<'a> ScopedTransaction<'a> {
    pub fn begin(port: &'a mut dyn SmartCardPort) -> PortResult<Self> {
        port.begin_transaction()?;
        Ok(Self { port })
    }

    pub fn port(&mut self) -> &mut dyn SmartCardPort {
        &mut *self.port
    }
}

impl Drop for ScopedTransaction<'_> {
    fn drop(&mut self) {
        self.port.end_transaction();
    }
}
