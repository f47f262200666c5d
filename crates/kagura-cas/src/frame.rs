//! MMTP frame view consumed by the descrambling fast path.

/// Clear MMTP header prefixed to every payload; never touched by the
/// descrambler.
pub const MMTP_HEADER_LEN: usize = 8;

/// Scrambling state signalled by the MMTP extension header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncryptionFlag {
    Unscrambled,
    Even,
    Odd,
}

impl EncryptionFlag {
    /// Decode the 2-bit `scrambling_control` field: `10` even key,
    /// `11` odd key, anything else in the clear.
    #[must_use]
    pub fn from_scrambling_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b10 => Self::Even,
            0b11 => Self::Odd,
            _ => Self::Unscrambled,
        }
    }
}

/// Mutable view of one MMTP packet handed over by the demultiplexer.
///
/// `payload` is the full packet payload: 8 clear header bytes followed by
/// ciphertext that is decrypted in place.
pub struct MmtpFrame<'a> {
    pub packet_id: u16,
    pub sequence_number: u32,
    pub flag: EncryptionFlag,
    pub payload: &'a mut [u8],
}

impl MmtpFrame<'_> {
    /// Initial CTR counter block: packet id and sequence number in big
    /// endian, zero-padded to the block size.
    #[must_use]
    pub fn counter_iv(&self) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..2].copy_from_slice(&self.packet_id.to_be_bytes());
        iv[2..6].copy_from_slice(&self.sequence_number.to_be_bytes());
        iv
    }
}
