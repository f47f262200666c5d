//! AES-128-CTR descrambling for scrambled broadcast payloads.
//!
//! One engine instance belongs to one fast-path caller; the cached key
//! schedule is deliberately not shared across threads.

#![forbid(unsafe_code)]

mod engine;

pub use engine::AesCtrEngine;
