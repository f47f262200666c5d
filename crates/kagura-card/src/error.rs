use thiserror::Error;

use crate::port::PortError;

/// Why the card's answer was rejected.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RejectReason {
    /// Non-success status word.
    #[error("status word 0x{0:04X}")]
    StatusWord(u16),

    /// Success status, but the reply is shorter than the fixed response
    /// layout; truncated fields are never used.
    #[error("response too short: need {need} bytes, got {got}")]
    ShortResponse { need: usize, got: usize },

    /// The authentication tag never matched within the retry budget.
    #[error("session key authentication failed")]
    AuthFailed,
}

/// Errors surfaced by the ACAS card client.
///
/// Reset-like transport failures and authentication mismatches are retried
/// internally (see [`AcasCard`](crate::AcasCard)); what comes out here is
/// final for the ECM that triggered the call. Two kinds cover every
/// card-side outcome: the transport gave out ([`Unavailable`](Self::Unavailable))
/// or the card refused ([`Rejected`](Self::Rejected), with the reason as
/// detail).
#[derive(Debug, Error)]
pub enum CardError {
    /// Reader absent, connect failed, or the retry budget ran out on resets.
    #[error("smart card unavailable: {0}")]
    Unavailable(#[source] PortError),

    /// The card refused the exchange: non-success status word, truncated
    /// reply, or an authentication tag that never matched.
    #[error("card rejected the command: {0}")]
    Rejected(RejectReason),

    /// The ECM misses its init vector or cannot ride a case-4-short APDU.
    #[error("invalid ECM length {len}")]
    InvalidEcm { len: usize },
}

pub type CardResult<T> = Result<T, CardError>;
