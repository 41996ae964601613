//! Session controller
//!
//! Drives the full connect → authenticate → secure read → deselect
//! pipeline and owns the retry policy. Session keys and the send sequence
//! counter live inside one authenticate-then-read attempt and never leak
//! across attempts; the chip is deselected at the start of every attempt
//! and once more on every terminal path, so the channel is never left
//! half-open for the next caller.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use mrtd_common::tlv;

use crate::apdu::{commands, ApduCommand, Transceiver};
use crate::bac::BacAuthenticator;
use crate::crypto::{MrzKey, SessionKeys};
use crate::dg::{self, files, IdDocument};
use crate::error::{CommunicationError, MrtdError};
use crate::secure::SecureChannel;
use crate::sod::SodValidator;

/// Largest chunk requested per READ BINARY
const READ_CHUNK: usize = 0xDF;

/// Largest elementary file accepted. Keeps READ BINARY offsets inside the
/// 15-bit range of P1/P2 (bit 8 of P1 switches to short-EF addressing)
/// and bounds what a hostile length field can make us allocate.
const MAX_FILE_LEN: usize = 32 * 1024;

/// Read behavior configuration
#[derive(Debug, Clone)]
pub struct ReadConfig {
    /// Authentication-plus-read attempts per data group
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Whether to read DG2 and extract the face image
    pub read_image: bool,
    /// CSCA trust anchor directory for SOD validation
    pub csca_path: Option<PathBuf>,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            retry_delay: Duration::from_secs(2),
            read_image: true,
            csca_path: None,
        }
    }
}

/// High-level travel document reader over any [`Transceiver`].
pub struct MrtdReader<T: Transceiver> {
    chip: T,
}

impl<T: Transceiver> MrtdReader<T> {
    pub fn new(chip: T) -> Self {
        Self { chip }
    }

    /// Release the underlying transceiver
    pub fn into_inner(self) -> T {
        self.chip
    }

    /// Read and merge DG1, DG11 and DG2 into a document record, running
    /// SOD validation when a validator and trust anchor path are given.
    pub fn read_document(
        &mut self,
        mrz: &MrzKey,
        config: &ReadConfig,
        sod_validator: Option<&dyn SodValidator>,
    ) -> Result<IdDocument, MrtdError> {
        let result = self.read_document_inner(mrz, config, sod_validator);
        // Terminal deselect on success and on every failure path
        self.chip.deselect();
        result
    }

    /// Read the raw content of a single data group, retrying with a fresh
    /// authentication per attempt.
    pub fn read_data_group(
        &mut self,
        mrz: &MrzKey,
        dg: u8,
        config: &ReadConfig,
    ) -> Result<Vec<u8>, MrtdError> {
        let seed = mrz.seed_keys()?;
        let result = self.read_with_retry(&seed, dg, config);
        self.chip.deselect();
        result
    }

    fn read_document_inner(
        &mut self,
        mrz: &MrzKey,
        config: &ReadConfig,
        sod_validator: Option<&dyn SodValidator>,
    ) -> Result<IdDocument, MrtdError> {
        let seed = mrz.seed_keys()?;

        // EF.COM is advisory: it tells us which data groups the document
        // claims to carry. Communication trouble here is tolerated.
        let claimed = match self.single_read(&seed, files::EF_COM) {
            Ok(data) => match dg::claimed_data_groups(&data) {
                Ok(list) => {
                    info!(?list, "EF.COM data group list");
                    Some(list)
                }
                Err(err) => {
                    warn!(error = %err, "EF.COM did not parse");
                    None
                }
            },
            Err(err) if err.is_retryable() => {
                warn!(error = %err, "EF.COM unreadable, proceeding without it");
                None
            }
            Err(err) => return Err(err),
        };
        let claims = |dg: u8| claimed.as_ref().map_or(true, |list| list.contains(&dg));

        // DG1 is mandatory
        let dg1 = self.read_with_retry(&seed, 1, config)?;
        let mut document = dg::parse_dg1(&dg1)?;
        document.dg1_raw = dg1;

        // DG11 enriches the record when present
        if claims(11) {
            match self.read_with_retry(&seed, 11, config) {
                Ok(data) => document.merge_dg11(dg::extract_dg11(&data)?),
                Err(MrtdError::MissingDataGroup { .. }) => {
                    warn!("DG11 unreadable, continuing without additional details");
                }
                Err(err) => return Err(err),
            }
        }

        // DG2 face image
        if config.read_image && claims(2) {
            let data = self.read_with_retry(&seed, 2, config)?;
            let dg2 = dg::extract_dg2(&data)?;
            let image = dg2.extract_image()?;
            debug!(
                format = ?image.format,
                description = %dg::format_description(&image.format_owner, &image.format_type),
                bytes = image.image.len(),
                "face image extracted"
            );
            document.image = Some(image);
        }

        // SOD validation handoff
        if let (Some(validator), Some(csca_path)) = (sod_validator, &config.csca_path) {
            match self.single_read(&seed, files::EF_SOD) {
                Ok(sod) => {
                    document.validity_info = Some(validator.validate(&sod, csca_path));
                }
                Err(err) if err.is_retryable() => {
                    warn!(error = %err, "EF.SOD unreadable, skipping validation");
                }
                Err(err) => return Err(err),
            }
        }

        document.read_at = Some(std::time::SystemTime::now());
        Ok(document)
    }

    fn read_with_retry(
        &mut self,
        seed: &SessionKeys,
        dg: u8,
        config: &ReadConfig,
    ) -> Result<Vec<u8>, MrtdError> {
        let fid = files::data_group(dg);

        for attempt in 1..=config.max_attempts {
            // Clean channel state before each authentication
            self.chip.deselect();

            match self.attempt_read(seed, fid) {
                Ok(data) if !data.is_empty() => {
                    debug!(dg, attempt, bytes = data.len(), "data group read");
                    return Ok(data);
                }
                Ok(_) => warn!(dg, attempt, "data group came back empty"),
                Err(err) if err.is_retryable() => {
                    warn!(dg, attempt, error = %err, "read attempt failed");
                }
                // Integrity and parse failures abort the session at once
                Err(err) => return Err(err),
            }

            if attempt < config.max_attempts {
                thread::sleep(config.retry_delay);
            }
        }

        Err(MrtdError::MissingDataGroup { dg })
    }

    fn single_read(&mut self, seed: &SessionKeys, fid: [u8; 2]) -> Result<Vec<u8>, MrtdError> {
        self.chip.deselect();
        self.attempt_read(seed, fid)
    }

    /// One authenticate-then-read pipeline with fresh session state.
    fn attempt_read(&mut self, seed: &SessionKeys, fid: [u8; 2]) -> Result<Vec<u8>, MrtdError> {
        let mut bac = BacAuthenticator::new(&mut self.chip);
        let mut channel = bac.authenticate(seed)?;
        self.read_file(&mut channel, fid)
    }

    /// SELECT the file and pull it in chunks over the secure channel.
    fn read_file(
        &mut self,
        channel: &mut SecureChannel,
        fid: [u8; 2],
    ) -> Result<Vec<u8>, MrtdError> {
        self.secure_exchange(channel, &commands::select_file(fid))?;

        // First the TLV header, to learn the file's total length
        let mut file = self.secure_exchange(channel, &commands::read_binary(0, 4))?;
        let header = tlv::decode_header(&file)?;
        let total = header.total_len();
        if total > MAX_FILE_LEN {
            return Err(MrtdError::Parse(format!(
                "file declares {total} bytes, over the {MAX_FILE_LEN} byte limit"
            )));
        }

        while file.len() < total {
            let remaining = total - file.len();
            let le = remaining.min(READ_CHUNK) as u8;
            let chunk =
                self.secure_exchange(channel, &commands::read_binary(file.len() as u16, le))?;
            if chunk.is_empty() {
                return Err(MrtdError::Parse("chip returned an empty READ BINARY chunk".into()));
            }
            file.extend_from_slice(&chunk);
        }
        file.truncate(total);
        Ok(file)
    }

    fn secure_exchange(
        &mut self,
        channel: &mut SecureChannel,
        command: &ApduCommand,
    ) -> Result<Vec<u8>, MrtdError> {
        let response = channel.wrap(command).send(&mut self.chip)?;
        if response.data.is_empty() && !response.is_success() {
            // Rejected below secure messaging; nothing to unwrap
            return Err(CommunicationError::UnexpectedStatus {
                sw: response.status_word(),
            }
            .into());
        }

        let (plaintext, sw) = channel.unwrap(&response)?;
        if sw != 0x9000 {
            return Err(CommunicationError::UnexpectedStatus { sw }.into());
        }
        Ok(plaintext)
    }
}
