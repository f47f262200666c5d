//! AES-128-CTR stream cipher over 16-byte counter blocks.

use aes::{
    cipher::{
        generic_array::GenericArray, InnerIvInit, KeyInit, KeyIvInit, StreamCipher,
        StreamCipherCoreWrapper,
    },
    Aes128,
};
use ctr::CtrCore;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes128CtrCore = CtrCore<Aes128, ctr::flavors::Ctr128BE>;

/// AES-128-CTR engine with a cached key schedule.
///
/// Control words only change on crypto-period boundaries, so the expanded
/// schedule is kept across calls and rebuilt only when the raw key bytes
/// differ. Hardware AES dispatch happens inside the block cipher itself
/// (runtime CPU detection); the portable backend skips the cache and
/// expands the key on every call, producing an identical keystream.
pub struct AesCtrEngine {
    cached: Option<([u8; 16], Aes128)>,
    force_portable: bool,
}

impl AesCtrEngine {
    #[must_use]
    pub fn new(force_portable: bool) -> Self {
        Self {
            cached: None,
            force_portable,
        }
    }

    /// Apply the keystream to `data` in place.
    ///
    /// `iv` is the initial counter block; it increments big-endian per
    /// 16-byte block. CTR is an involution, so the same call encrypts
    /// and decrypts.
    pub fn apply(&mut self, key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
        if data.is_empty() {
            return;
        }
        let nonce = GenericArray::from_slice(iv);

        if self.force_portable {
            let mut cipher = Aes128Ctr::new(GenericArray::from_slice(key), nonce);
            cipher.apply_keystream(data);
            return;
        }

        if !matches!(&self.cached, Some((cached, _)) if cached == key) {
            self.cached = Some((*key, Aes128::new(GenericArray::from_slice(key))));
        }
        if let Some((_, block)) = &self.cached {
            let core = Aes128CtrCore::inner_iv_init(block.clone(), nonce);
            let mut cipher = StreamCipherCoreWrapper::from_core(core);
            cipher.apply_keystream(data);
        }
    }
}

impl Default for AesCtrEngine {
    fn default() -> Self {
        Self::new(false)
    }
}
