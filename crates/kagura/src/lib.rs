//! # kagura
//!
//! Conditional-access descrambling for MMT/TLV broadcast streams.
//!
//! The pipeline: [`IoPipeline`] reads the multiplexed stream in large
//! buffers; an external demultiplexer routes ECM blobs to
//! [`Descrambler::on_ecm`] and scrambled MMTP packets to
//! [`Descrambler::decrypt`]; the descrambler resolves ECMs into
//! control words through the smart card behind [`SmartCardPort`].
//!
//! # Example
//!
//! ```no_run
//! use kagura::{DescramblerConfig, EncryptionFlag, IoPipeline, MmtpFrame};
//! # use kagura::SmartCardPort;
//! # fn open_reader() -> Box<dyn SmartCardPort> { unimplemented!() }
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut descrambler = DescramblerConfig::new([0u8; 32])
//!     .with_boxed_card(open_reader())
//!     .build()?;
//!
//! let pipeline = IoPipeline::new(std::io::stdin());
//! while let Ok(filled) = pipeline.next_filled() {
//!     // demux filled.bytes(), then per scrambled packet:
//!     let mut payload = vec![0u8; 188];
//!     let mut frame = MmtpFrame {
//!         packet_id: 0x0110,
//!         sequence_number: 7,
//!         flag: EncryptionFlag::Even,
//!         payload: &mut payload,
//!     };
//!     let _ = descrambler.decrypt(&mut frame);
//!     let len = filled.len();
//!     pipeline.return_processed(filled.finish(len..len));
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod config;

pub use config::{ConfigError, DescramblerConfig};
pub use kagura_card::{
    AcasCard, ApduCommand, ApduResponse, CardError, CardResult, DecryptionKey, PortError,
    PortResult, RejectReason, ScopedTransaction, SmartCardPort, SW_SUCCESS,
};
pub use kagura_cas::{
    Descrambler, EncryptionFlag, MmtpFrame, DEFAULT_KEY_SWITCH_TIMEOUT, MMTP_HEADER_LEN,
};
pub use kagura_crypt::AesCtrEngine;
pub use kagura_io::{
    FilledBuffer, IoError, IoPipeline, IoResult, PipelineOptions, ProcessedBuffer, BUFFER_SIZE,
    NEW_DATA_AREA_SIZE, NUM_BUFFERS, SPILL_OVER_AREA_SIZE,
};
