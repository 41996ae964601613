//! MRTD Card - Smart card reading for ICAO 9303 travel documents
//!
//! This crate talks to electronic passports and identity cards via PC/SC
//! readers: Basic Access Control key derivation and mutual authentication,
//! the secure messaging layer, and extraction of the DG1/DG2/DG11 data
//! groups into a document record.

pub mod apdu;
pub mod bac;
pub mod crypto;
pub mod dg;
pub mod error;
pub mod reader;
pub mod secure;
pub mod session;
pub mod sod;

pub use apdu::{ApduCommand, ApduResponse, Transceiver};
pub use bac::{BacAuthenticator, BacState};
pub use crypto::{MrzKey, SessionKeys};
pub use dg::{BiometricImage, Dg11Data, Dg2Data, IdDocument, ImageFormat};
pub use error::{CommunicationError, MrtdError};
pub use reader::{CardReader, PcscTransceiver};
pub use secure::SecureChannel;
pub use session::{MrtdReader, ReadConfig};
pub use sod::{SodValidator, UnverifiedSod};

/// Re-export commonly used types
pub use pcsc::{Card, Context, Error as PcscError};
