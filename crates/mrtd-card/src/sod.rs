//! Security object handoff
//!
//! The core reads EF.SOD over the secure channel and hands the raw bytes
//! to an external validator together with a CSCA trust anchor path.
//! Certificate chain building and signature verification live behind this
//! trait, outside the protocol core.

use std::path::Path;

/// External validator for the document security object.
pub trait SodValidator {
    /// Validate raw EF.SOD bytes against the trust anchors found under
    /// `csca_path` and return a textual verdict.
    fn validate(&self, sod: &[u8], csca_path: &Path) -> String;
}

/// Placeholder validator reporting that no chain verification ran.
///
/// Useful for deployments that collect the SOD for offline auditing.
pub struct UnverifiedSod;

impl SodValidator for UnverifiedSod {
    fn validate(&self, sod: &[u8], _csca_path: &Path) -> String {
        format!("SOD captured ({} bytes), signature chain not verified", sod.len())
    }
}
