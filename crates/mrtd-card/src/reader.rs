//! PC/SC card reader management

use pcsc::{Card, Context, Disposition, Protocols, Scope, ShareMode, MAX_BUFFER_SIZE};
use tracing::debug;

use crate::apdu::Transceiver;
use crate::error::{CommunicationError, MrtdError};

/// Card reader wrapper for managing PC/SC connections
pub struct CardReader {
    context: Context,
}

impl CardReader {
    /// Create a new CardReader by establishing a PC/SC context
    pub fn new() -> Result<Self, pcsc::Error> {
        let context = Context::establish(Scope::User)?;
        Ok(Self { context })
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<String>, pcsc::Error> {
        let mut readers_buf = [0; 2048];
        let readers = self.context.list_readers(&mut readers_buf)?;

        Ok(readers
            .map(|r| r.to_str().unwrap_or("Unknown").to_string())
            .collect())
    }

    /// Connect to the first available reader
    pub fn connect_first(&self) -> Result<(PcscTransceiver, String), pcsc::Error> {
        let mut readers_buf = [0; 2048];
        let mut readers = self.context.list_readers(&mut readers_buf)?;

        if let Some(reader) = readers.next() {
            let reader_name = reader.to_str().unwrap_or("Unknown").to_string();
            let card = self
                .context
                .connect(reader, ShareMode::Shared, Protocols::ANY)?;
            Ok((PcscTransceiver::new(card), reader_name))
        } else {
            Err(pcsc::Error::NoReadersAvailable)
        }
    }

    /// Connect to a specific reader by name (CStr)
    pub fn connect(&self, reader_name: &std::ffi::CStr) -> Result<PcscTransceiver, pcsc::Error> {
        let card = self
            .context
            .connect(reader_name, ShareMode::Shared, Protocols::ANY)?;
        Ok(PcscTransceiver::new(card))
    }
}

/// [`Transceiver`] backed by a connected PC/SC card.
pub struct PcscTransceiver {
    card: Card,
}

impl PcscTransceiver {
    pub fn new(card: Card) -> Self {
        Self { card }
    }

    /// Release the underlying card connection
    pub fn into_card(self) -> Card {
        self.card
    }
}

impl Transceiver for PcscTransceiver {
    fn transceive(&mut self, command: &[u8]) -> Result<Vec<u8>, MrtdError> {
        let mut response_buf = [0; MAX_BUFFER_SIZE];
        let response = self
            .card
            .transmit(command, &mut response_buf)
            .map_err(CommunicationError::Pcsc)?;
        Ok(response.to_vec())
    }

    fn deselect(&mut self) {
        // A warm reset drops any selected applet and secure messaging
        // state; failure here only matters to the next connect attempt.
        if let Err(err) = self
            .card
            .reconnect(ShareMode::Shared, Protocols::ANY, Disposition::ResetCard)
        {
            debug!(error = %err, "card reset during deselect failed");
        }
    }
}
