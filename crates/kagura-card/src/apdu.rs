//! Case-4-short APDU encoding and response parsing.

use crate::error::{CardError, CardResult, RejectReason};

/// Status word the card reports on success.
pub const SW_SUCCESS: u16 = 0x9000;

/// Four-byte APDU command header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
}

impl ApduCommand {
    #[must_use]
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self { cla, ins, p1, p2 }
    }

    /// Encode as case-4-short: `CLA INS P1 P2 Lc <data> Le`.
    ///
    /// # Panics
    ///
    /// Lc is a single byte, so `data` must be 1..=255 bytes; a silent
    /// truncation would send the card a command whose Lc disagrees with
    /// its body, so an over-length payload panics instead.
    #[must_use]
    pub fn case4_short(&self, data: &[u8], le: u8) -> Vec<u8> {
        assert!(
            !data.is_empty() && data.len() <= u8::MAX as usize,
            "case-4-short data must be 1..=255 bytes, got {}",
            data.len()
        );
        let mut apdu = Vec::with_capacity(6 + data.len());
        apdu.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2, data.len() as u8]);
        apdu.extend_from_slice(data);
        apdu.push(le);
        apdu
    }
}

/// Parsed card reply: a data field followed by the status word SW1 SW2.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApduResponse {
    data: Vec<u8>,
    sw1: u8,
    sw2: u8,
}

impl ApduResponse {
    /// Split a raw transport reply into data and status word.
    pub fn parse(raw: &[u8]) -> CardResult<Self> {
        let Some(split) = raw.len().checked_sub(2) else {
            return Err(CardError::Rejected(RejectReason::ShortResponse {
                need: 2,
                got: raw.len(),
            }));
        };
        Ok(Self {
            data: raw[..split].to_vec(),
            sw1: raw[split],
            sw2: raw[split + 1],
        })
    }

    /// Assemble a response from an already-split data field and status word.
    #[must_use]
    pub fn from_parts(data: Vec<u8>, sw1: u8, sw2: u8) -> Self {
        Self { data, sw1, sw2 }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn sw(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.sw() == SW_SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case4_short_layout() {
        let cmd = ApduCommand::new(0x90, 0xA0, 0x00, 0x01);
        let apdu = cmd.case4_short(&[0xDE, 0xAD, 0xBE, 0xEF], 0x00);
        assert_eq!(
            apdu,
            vec![0x90, 0xA0, 0x00, 0x01, 0x04, 0xDE, 0xAD, 0xBE, 0xEF, 0x00]
        );
    }

    #[test]
    fn parse_splits_data_and_status() {
        let response = ApduResponse::parse(&[0x01, 0x02, 0x03, 0x90, 0x00]).unwrap();
        assert_eq!(response.data(), &[0x01, 0x02, 0x03]);
        assert_eq!(response.sw(), 0x9000);
        assert!(response.is_success());
    }

    #[test]
    fn parse_status_only_reply() {
        let response = ApduResponse::parse(&[0x6A, 0x82]).unwrap();
        assert!(response.data().is_empty());
        assert_eq!(response.sw(), 0x6A82);
        assert!(!response.is_success());
    }

    #[test]
    fn parse_rejects_truncated_reply() {
        let err = ApduResponse::parse(&[0x90]).unwrap_err();
        assert!(matches!(
            err,
            CardError::Rejected(RejectReason::ShortResponse { need: 2, got: 1 })
        ));
    }

    #[test]
    #[should_panic(expected = "case-4-short data")]
    fn case4_short_rejects_oversized_data() {
        let cmd = ApduCommand::new(0x90, 0x34, 0x00, 0x01);
        let _ = cmd.case4_short(&[0u8; 256], 0x00);
    }
}
