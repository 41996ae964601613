//! APDU (Application Protocol Data Unit) command handling

use crate::error::{CommunicationError, MrtdError};

/// Raw command/response exchange with a contactless chip.
///
/// Implemented by the PC/SC backend in [`crate::reader`] and by scripted
/// mock chips in tests. The protocol layers never talk to hardware
/// directly.
pub trait Transceiver {
    /// Send raw command bytes, return the raw response including the
    /// trailing status word.
    fn transceive(&mut self, command: &[u8]) -> Result<Vec<u8>, MrtdError>;

    /// Deselect the chip, returning the channel to a clean state.
    ///
    /// Called at the start of every read attempt and on every terminal
    /// path of a session.
    fn deselect(&mut self);
}

/// APDU response containing data and status word
#[derive(Debug, Clone)]
pub struct ApduResponse {
    /// Response data (without status word)
    pub data: Vec<u8>,
    /// Status word SW1
    pub sw1: u8,
    /// Status word SW2
    pub sw2: u8,
}

impl ApduResponse {
    /// Split raw response bytes into data and status word
    pub fn from_bytes(raw: &[u8]) -> Result<Self, MrtdError> {
        if raw.len() < 2 {
            return Err(CommunicationError::ShortResponse { len: raw.len() }.into());
        }
        Ok(Self {
            data: raw[..raw.len() - 2].to_vec(),
            sw1: raw[raw.len() - 2],
            sw2: raw[raw.len() - 1],
        })
    }

    /// Check if the response indicates success (9000)
    pub fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Get the full status word as a 16-bit value
    pub fn status_word(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Get status word as hex string (e.g., "9000")
    pub fn status_string(&self) -> String {
        format!("{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// APDU command builder
#[derive(Debug, Clone)]
pub struct ApduCommand {
    pub(crate) cla: u8,
    pub(crate) ins: u8,
    pub(crate) p1: u8,
    pub(crate) p2: u8,
    pub(crate) data: Vec<u8>,
    pub(crate) le: Option<u8>,
}

impl ApduCommand {
    /// Create a new APDU command
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Set command data
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Set expected response length (0x00 means "up to 256")
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Build the APDU command bytes
    pub fn build(&self) -> Vec<u8> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];

        if !self.data.is_empty() {
            apdu.push(self.data.len() as u8);
            apdu.extend_from_slice(&self.data);
        }

        if let Some(le) = self.le {
            apdu.push(le);
        }

        apdu
    }

    /// Send this command and split off the status word
    pub fn send<T: Transceiver + ?Sized>(&self, chip: &mut T) -> Result<ApduResponse, MrtdError> {
        let raw = chip.transceive(&self.build())?;
        ApduResponse::from_bytes(&raw)
    }
}

/// ISO 7816 commands used by the travel document protocol
pub mod commands {
    use super::ApduCommand;

    /// SELECT applet by AID
    pub fn select_applet(aid: &[u8]) -> ApduCommand {
        ApduCommand::new(0x00, 0xA4, 0x04, 0x0C).data(aid.to_vec())
    }

    /// GET CHALLENGE, requesting an 8-byte RND.IC
    pub fn get_challenge() -> ApduCommand {
        ApduCommand::new(0x00, 0x84, 0x00, 0x00).le(0x08)
    }

    /// EXTERNAL AUTHENTICATE carrying E.IFD || M.IFD
    pub fn external_authenticate(data: Vec<u8>) -> ApduCommand {
        ApduCommand::new(0x00, 0x82, 0x00, 0x00).data(data).le(0x28)
    }

    /// SELECT elementary file by two-byte file identifier
    pub fn select_file(fid: [u8; 2]) -> ApduCommand {
        ApduCommand::new(0x00, 0xA4, 0x02, 0x0C).data(fid.to_vec())
    }

    /// READ BINARY at `offset`, expecting `le` bytes
    pub fn read_binary(offset: u16, le: u8) -> ApduCommand {
        let [p1, p2] = offset.to_be_bytes();
        ApduCommand::new(0x00, 0xB0, p1, p2).le(le)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_with_data_and_le() {
        let apdu = commands::external_authenticate(vec![0xAA; 40]).build();
        assert_eq!(&apdu[..4], &[0x00, 0x82, 0x00, 0x00]);
        assert_eq!(apdu[4], 40);
        assert_eq!(apdu.len(), 5 + 40 + 1);
        assert_eq!(*apdu.last().unwrap(), 0x28);
    }

    #[test]
    fn test_build_case_2() {
        let apdu = commands::read_binary(0x011E, 0x04).build();
        assert_eq!(apdu, vec![0x00, 0xB0, 0x01, 0x1E, 0x04]);
    }

    #[test]
    fn test_response_from_bytes() {
        let resp = ApduResponse::from_bytes(&[0x01, 0x02, 0x90, 0x00]).unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.data, vec![0x01, 0x02]);
        assert_eq!(resp.status_word(), 0x9000);

        let resp = ApduResponse::from_bytes(&[0x69, 0x82]).unwrap();
        assert!(!resp.is_success());
        assert_eq!(resp.status_string(), "6982");
    }

    #[test]
    fn test_response_too_short() {
        assert!(ApduResponse::from_bytes(&[0x90]).is_err());
    }
}
