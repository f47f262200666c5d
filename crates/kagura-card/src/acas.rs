//! ACAS card client: session-key derivation and ECM resolution.

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, trace, warn};

use crate::{
    apdu::ApduCommand,
    error::{CardError, CardResult, RejectReason},
    port::{PortError, ScopedTransaction, SmartCardPort},
};

/// `90 A0 00 01` — mutual-nonce session key exchange.
const CMD_A0: ApduCommand = ApduCommand::new(0x90, 0xA0, 0x00, 0x01);
/// `90 34 00 01` — ECM decryption request.
const CMD_ECM: ApduCommand = ApduCommand::new(0x90, 0x34, 0x00, 0x01);

/// Fixed prefix of the A0 command data, followed by the 8-byte local nonce.
const A0_DATA_PREFIX: [u8; 8] = [0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x8A, 0xF7];

/// A0 response layout: card nonce at [0x06, 0x0E), auth tag at [0x0E, 0x2E).
const A0_RESPONSE_OFFSET: usize = 0x06;
const A0_HASH_OFFSET: usize = 0x0E;

/// ECM response layout: 32-byte mixing value at [0x06, 0x26).
const ECM_RESPONSE_OFFSET: usize = 0x06;

/// The ECM init vector sits at [0x04, 0x1B) of the ECM blob.
const ECM_INIT_OFFSET: usize = 0x04;
const ECM_INIT_LEN: usize = 0x17;

/// Retries allowed per `ecm` call, shared between reset recovery and
/// authentication redo.
const MAX_RETRIES: u32 = 2;

/// The odd/even control-word pair one ECM resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecryptionKey {
    /// Key half active while the scrambling flag reads ODD.
    pub odd: [u8; 16],
    /// Key half active while the scrambling flag reads EVEN.
    pub even: [u8; 16],
}

/// Why a single attempt failed, driving the retry decision.
enum AttemptError {
    /// Transport failure; retried when reset-like.
    Port(PortError),
    /// The card's A0 tag did not authenticate; treated as transient.
    Auth,
    /// Final for this call, no matter the remaining budget.
    Fatal(CardError),
}

/// Client side of the ACAS access-control card.
///
/// A fresh session key (Kcl) is negotiated for every ECM so the derived
/// control words are always paired with a transaction-current session;
/// the A0 and 34 commands therefore run under one scoped transaction.
pub struct AcasCard {
    port: Box<dyn SmartCardPort>,
    master_key: [u8; 32],
}

impl AcasCard {
    #[must_use]
    pub fn new(port: Box<dyn SmartCardPort>, master_key: [u8; 32]) -> Self {
        Self { port, master_key }
    }

    /// Resolve one ECM into its control-word pair.
    ///
    /// Reset-like transport failures and A0 authentication mismatches are
    /// retried (reconnect + fresh session key) at most [`MAX_RETRIES`]
    /// times. Any non-success status word is final.
    ///
    /// # Errors
    ///
    /// [`CardError::InvalidEcm`] for blobs the protocol cannot carry,
    /// [`CardError::Unavailable`] when the transport gives out,
    /// [`CardError::Rejected`] on card-side refusal — a non-success
    /// status word, a truncated reply, or a card that never proves
    /// knowledge of the master key.
    pub fn ecm(&mut self, ecm: &[u8]) -> CardResult<DecryptionKey> {
        if ecm.len() < ECM_INIT_OFFSET + ECM_INIT_LEN || ecm.len() > u8::MAX as usize {
            return Err(CardError::InvalidEcm { len: ecm.len() });
        }

        let mut retries = 0u32;
        loop {
            match self.attempt(ecm) {
                Ok(key) => return Ok(key),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Port(err)) => {
                    if err.is_retryable() && retries < MAX_RETRIES {
                        retries += 1;
                        debug!(retry = retries, %err, "card transport reset, reconnecting");
                        continue;
                    }
                    return Err(CardError::Unavailable(err));
                }
                Err(AttemptError::Auth) => {
                    if retries < MAX_RETRIES {
                        retries += 1;
                        debug!(retry = retries, "authentication mismatch, redoing exchange");
                        continue;
                    }
                    return Err(CardError::Rejected(RejectReason::AuthFailed));
                }
            }
        }
    }

    /// One full exchange: connect if needed, then A0 + 34 inside a single
    /// scoped transaction.
    fn attempt(&mut self, ecm: &[u8]) -> Result<DecryptionKey, AttemptError> {
        let port = self.port.as_mut();
        if !port.is_initialized() {
            port.initialize().map_err(AttemptError::Port)?;
        }
        if !port.is_connected() {
            port.connect().map_err(AttemptError::Port)?;
        }

        let mut txn = ScopedTransaction::begin(port).map_err(AttemptError::Port)?;

        let kcl = derive_session_key(txn.port(), &self.master_key)?;

        let response = txn
            .port()
            .transmit(&CMD_ECM.case4_short(ecm, 0x00))
            .map_err(AttemptError::Port)?;
        if !response.is_success() {
            return Err(AttemptError::Fatal(CardError::Rejected(
                RejectReason::StatusWord(response.sw()),
            )));
        }

        let payload = response.data();
        let need = ECM_RESPONSE_OFFSET + 32;
        if payload.len() < need {
            return Err(AttemptError::Fatal(CardError::Rejected(
                RejectReason::ShortResponse {
                    need,
                    got: payload.len(),
                },
            )));
        }
        let ecm_response = &payload[ECM_RESPONSE_OFFSET..ECM_RESPONSE_OFFSET + 32];
        let ecm_init = &ecm[ECM_INIT_OFFSET..ECM_INIT_OFFSET + ECM_INIT_LEN];

        let mut hasher = Sha256::new();
        hasher.update(kcl);
        hasher.update(ecm_init);
        let mut cw: [u8; 32] = hasher.finalize().into();
        for (byte, mask) in cw.iter_mut().zip(ecm_response) {
            *byte ^= mask;
        }
        trace!(cw = %hex::encode(cw), "control words derived");

        let mut odd = [0u8; 16];
        let mut even = [0u8; 16];
        odd.copy_from_slice(&cw[..16]);
        even.copy_from_slice(&cw[16..]);
        Ok(DecryptionKey { odd, even })
    }
}

/// Run the A0 exchange and derive Kcl.
///
/// Kcl = SHA-256(master key ‖ local nonce ‖ card nonce); the card proves
/// possession of the master key by returning SHA-256(Kcl ‖ local nonce),
/// compared in constant time.
fn derive_session_key(
    port: &mut dyn SmartCardPort,
    master_key: &[u8; 32],
) -> Result<[u8; 32], AttemptError> {
    let mut a0_init = [0u8; 8];
    OsRng.fill_bytes(&mut a0_init);

    let mut data = [0u8; 16];
    data[..8].copy_from_slice(&A0_DATA_PREFIX);
    data[8..].copy_from_slice(&a0_init);

    let response = port
        .transmit(&CMD_A0.case4_short(&data, 0x00))
        .map_err(AttemptError::Port)?;
    if !response.is_success() {
        return Err(AttemptError::Fatal(CardError::Rejected(
            RejectReason::StatusWord(response.sw()),
        )));
    }

    let payload = response.data();
    let need = A0_HASH_OFFSET + 32;
    if payload.len() < need {
        return Err(AttemptError::Fatal(CardError::Rejected(
            RejectReason::ShortResponse {
                need,
                got: payload.len(),
            },
        )));
    }
    let a0_response = &payload[A0_RESPONSE_OFFSET..A0_HASH_OFFSET];
    let a0_hash = &payload[A0_HASH_OFFSET..A0_HASH_OFFSET + 32];

    let mut hasher = Sha256::new();
    hasher.update(master_key);
    hasher.update(a0_init);
    hasher.update(a0_response);
    let kcl: [u8; 32] = hasher.finalize().into();

    let mut hasher = Sha256::new();
    hasher.update(kcl);
    hasher.update(a0_init);
    let check: [u8; 32] = hasher.finalize().into();

    if !bool::from(check.ct_eq(a0_hash)) {
        warn!("card authentication tag mismatch");
        return Err(AttemptError::Auth);
    }

    trace!(kcl = %hex::encode(kcl), "session key derived");
    Ok(kcl)
}
