//! Secure messaging codec
//!
//! After BAC the chip only accepts protected APDUs: command data travels
//! encrypted in data object 87, the expected length in DO97, and a retail
//! MAC over the header and data objects in DO8E, chained through the send
//! sequence counter. Responses come back the same way (DO87 + DO99 + DO8E).
//!
//! Both sides advance the SSC unconditionally on every exchange, so it is
//! incremented exactly once per wrap and once per unwrap even when
//! verification subsequently fails. A MAC mismatch leaves the channel
//! desynchronized and unrecoverable; callers must abandon the session.

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use mrtd_common::tlv;

use crate::apdu::{ApduCommand, ApduResponse};
use crate::crypto::{
    pad_iso7816, retail_mac, tdes_cbc_decrypt, tdes_cbc_encrypt, unpad_iso7816, SessionKeys,
};
use crate::error::MrtdError;

/// Secure messaging bits set in the class byte of every protected command
const CLA_SECURE_MESSAGING: u8 = 0x0C;

/// An established secure messaging channel: session keys plus the send
/// sequence counter, owned by one session for its whole lifetime.
pub struct SecureChannel {
    keys: SessionKeys,
    ssc: u64,
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Session keys stay out of logs and error chains
        f.debug_struct("SecureChannel")
            .field("ssc", &self.ssc)
            .finish_non_exhaustive()
    }
}

impl SecureChannel {
    /// Create a channel from freshly derived session keys and the SSC
    /// initial value taken from the authentication nonces.
    pub fn new(keys: SessionKeys, ssc: u64) -> Self {
        Self { keys, ssc }
    }

    /// Current send sequence counter value
    pub fn ssc(&self) -> u64 {
        self.ssc
    }

    /// Protect a plain command for transmission.
    pub fn wrap(&mut self, command: &ApduCommand) -> ApduCommand {
        self.ssc = self.ssc.wrapping_add(1);

        let cla = command.cla | CLA_SECURE_MESSAGING;
        let padded_header = pad_iso7816(&[cla, command.ins, command.p1, command.p2]);

        let mut body = Vec::new();

        if !command.data.is_empty() {
            let padded = Zeroizing::new(pad_iso7816(&command.data));
            let encrypted = tdes_cbc_encrypt(&self.keys.k_enc, &padded);

            // DO87: padding indicator 0x01 followed by the ciphertext
            body.push(0x87);
            tlv::encode_length(&mut body, 1 + encrypted.len());
            body.push(0x01);
            body.extend_from_slice(&encrypted);
        }

        if let Some(le) = command.le {
            body.extend_from_slice(&[0x97, 0x01, le]);
        }

        // MAC covers SSC, the padded header and the data objects built so
        // far, in that order.
        let mut mac_input = Vec::with_capacity(8 + padded_header.len() + body.len());
        mac_input.extend_from_slice(&self.ssc.to_be_bytes());
        mac_input.extend_from_slice(&padded_header);
        mac_input.extend_from_slice(&body);
        let mac = retail_mac(&self.keys.k_mac, &mac_input);

        body.push(0x8E);
        body.push(mac.len() as u8);
        body.extend_from_slice(&mac);

        ApduCommand::new(cla, command.ins, command.p1, command.p2)
            .data(body)
            .le(0x00)
    }

    /// Verify and decrypt a protected response, returning the plaintext
    /// and the status word carried in DO99.
    ///
    /// Every structural defect of a protected response is reported as
    /// [`MrtdError::SecureMessagingIntegrity`]: a response that fails to
    /// parse is indistinguishable from a tampered one, and decoding must
    /// never silently yield garbage.
    pub fn unwrap(&mut self, response: &ApduResponse) -> Result<(Vec<u8>, u16), MrtdError> {
        // The chip has already advanced its counter for this response;
        // match it before any verification can fail.
        self.ssc = self.ssc.wrapping_add(1);

        let objects = split_objects(&response.data)
            .ok_or(MrtdError::SecureMessagingIntegrity("malformed response objects"))?;

        let mut received_mac: Option<&[u8]> = None;
        let mut mac_input = Vec::with_capacity(8 + response.data.len());
        mac_input.extend_from_slice(&self.ssc.to_be_bytes());

        let mut encrypted: Option<&[u8]> = None;
        let mut status: Option<&[u8]> = None;

        for obj in &objects {
            match obj.tag {
                0x8E => received_mac = Some(obj.value),
                tag => {
                    // Data objects with an odd tag are authenticated, in
                    // transmission order.
                    if tag & 0x01 != 0 {
                        mac_input.extend_from_slice(obj.raw);
                    }
                    match tag {
                        0x87 => encrypted = Some(obj.value),
                        0x99 => status = Some(obj.value),
                        _ => {}
                    }
                }
            }
        }

        let received_mac =
            received_mac.ok_or(MrtdError::SecureMessagingIntegrity("response carries no MAC"))?;
        let computed = retail_mac(&self.keys.k_mac, &mac_input);
        if !bool::from(computed.ct_eq(received_mac)) {
            return Err(MrtdError::SecureMessagingIntegrity("response MAC mismatch"));
        }

        let status =
            status.ok_or(MrtdError::SecureMessagingIntegrity("response carries no status"))?;
        if status.len() != 2 {
            return Err(MrtdError::SecureMessagingIntegrity("malformed status object"));
        }
        let sw = u16::from_be_bytes([status[0], status[1]]);

        let plaintext = match encrypted {
            None => Vec::new(),
            Some(payload) => {
                if payload.first() != Some(&0x01) {
                    return Err(MrtdError::SecureMessagingIntegrity("unknown padding indicator"));
                }
                let ciphertext = &payload[1..];
                if ciphertext.is_empty() || ciphertext.len() % 8 != 0 {
                    return Err(MrtdError::SecureMessagingIntegrity("misaligned ciphertext"));
                }
                let padded = Zeroizing::new(tdes_cbc_decrypt(&self.keys.k_enc, ciphertext));
                unpad_iso7816(&padded)
                    .map_err(|_| MrtdError::SecureMessagingIntegrity("invalid plaintext padding"))?
            }
        };

        Ok((plaintext, sw))
    }
}

/// A response data object with its raw (tag || length || value) bytes kept
/// for MAC recomputation.
struct ResponseObject<'a> {
    tag: u8,
    value: &'a [u8],
    raw: &'a [u8],
}

fn split_objects(data: &[u8]) -> Option<Vec<ResponseObject<'_>>> {
    let mut objects = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let header = tlv::decode_header(&data[offset..]).ok()?;
        let total = header.header_len.checked_add(header.value_len)?;
        if offset + total > data.len() {
            return None;
        }
        let raw = &data[offset..offset + total];
        objects.push(ResponseObject {
            tag: data[offset],
            value: &raw[header.header_len..],
            raw,
        });
        offset += total;
    }
    Some(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apdu::commands;
    use crate::crypto::derive_session_keys;
    use mrtd_common::tlv::encode_length;

    fn test_keys() -> SessionKeys {
        derive_session_keys(b"secure messaging test keys")
    }

    /// Build the chip's side of a protected response for the given SSC
    /// value (the value the reader will hold after its own increment).
    fn chip_response(keys: &SessionKeys, ssc: u64, plaintext: Option<&[u8]>, sw: u16) -> ApduResponse {
        let mut body = Vec::new();

        if let Some(plain) = plaintext {
            let encrypted = tdes_cbc_encrypt(&keys.k_enc, &pad_iso7816(plain));
            body.push(0x87);
            encode_length(&mut body, 1 + encrypted.len());
            body.push(0x01);
            body.extend_from_slice(&encrypted);
        }
        body.extend_from_slice(&[0x99, 0x02]);
        body.extend_from_slice(&sw.to_be_bytes());

        let mut mac_input = Vec::new();
        mac_input.extend_from_slice(&ssc.to_be_bytes());
        mac_input.extend_from_slice(&body);
        let mac = retail_mac(&keys.k_mac, &mac_input);

        body.push(0x8E);
        body.push(0x08);
        body.extend_from_slice(&mac);

        ApduResponse {
            data: body,
            sw1: 0x90,
            sw2: 0x00,
        }
    }

    #[test]
    fn test_ssc_increments_once_per_direction() {
        let mut channel = SecureChannel::new(test_keys(), 100);
        for expected in 101..=105u64 {
            channel.wrap(&commands::get_challenge());
            assert_eq!(channel.ssc(), expected);
        }

        // Unwrap advances the counter exactly once, even when it fails
        let bogus = ApduResponse {
            data: vec![0xFF, 0xFF],
            sw1: 0x90,
            sw2: 0x00,
        };
        assert!(channel.unwrap(&bogus).is_err());
        assert_eq!(channel.ssc(), 106);
    }

    #[test]
    fn test_debug_shows_counter_but_never_keys() {
        let channel = SecureChannel::new(test_keys(), 42);
        let rendered = format!("{:?}", channel);
        assert!(rendered.contains("ssc: 42"));
        assert!(!rendered.contains("k_enc"));
        assert!(!rendered.contains("keys"));
    }

    #[test]
    fn test_wrap_structure() {
        let mut channel = SecureChannel::new(test_keys(), 0);
        let wrapped = channel.wrap(&commands::select_file([0x01, 0x01]));
        let bytes = wrapped.build();

        // CLA has the secure messaging bits, INS/P1/P2 unchanged
        assert_eq!(bytes[0], 0x0C);
        assert_eq!(&bytes[1..4], &[0xA4, 0x02, 0x0C]);

        let body = &bytes[5..bytes.len() - 1];
        // DO87 first: 0x87, length 0x09 (indicator + one cipher block), 0x01
        assert_eq!(&body[..3], &[0x87, 0x09, 0x01]);
        // DO8E last, 8-byte MAC
        assert_eq!(body[body.len() - 10], 0x8E);
        assert_eq!(body[body.len() - 9], 0x08);
        // Trailing Le of zero
        assert_eq!(*bytes.last().unwrap(), 0x00);
    }

    #[test]
    fn test_wrap_without_data_has_do97_only() {
        let mut channel = SecureChannel::new(test_keys(), 0);
        let wrapped = channel.wrap(&commands::read_binary(0, 0x20));
        let body = wrapped.build();
        let body = &body[5..body.len() - 1];
        assert_eq!(&body[..3], &[0x97, 0x01, 0x20]);
        assert_eq!(body[3], 0x8E);
    }

    #[test]
    fn test_unwrap_roundtrip() {
        let keys = test_keys();
        let mut channel = SecureChannel::new(keys.clone(), 7);

        let response = chip_response(&keys, 8, Some(b"data group bytes"), 0x9000);
        let (plain, sw) = channel.unwrap(&response).unwrap();
        assert_eq!(plain, b"data group bytes");
        assert_eq!(sw, 0x9000);
        assert_eq!(channel.ssc(), 8);
    }

    #[test]
    fn test_unwrap_status_only_response() {
        let keys = test_keys();
        let mut channel = SecureChannel::new(keys.clone(), 0);
        let response = chip_response(&keys, 1, None, 0x6A82);
        let (plain, sw) = channel.unwrap(&response).unwrap();
        assert!(plain.is_empty());
        assert_eq!(sw, 0x6A82);
    }

    #[test]
    fn test_unwrap_rejects_stale_ssc() {
        let keys = test_keys();
        let mut channel = SecureChannel::new(keys.clone(), 7);

        // MAC computed over the wrong counter value
        let response = chip_response(&keys, 9, Some(b"data"), 0x9000);
        assert!(matches!(
            channel.unwrap(&response),
            Err(MrtdError::SecureMessagingIntegrity(_))
        ));
    }

    #[test]
    fn test_any_single_byte_flip_fails_integrity() {
        let keys = test_keys();
        let reference = chip_response(&keys, 1, Some(b"protected payload"), 0x9000);

        for i in 0..reference.data.len() {
            let mut tampered = reference.clone();
            tampered.data[i] ^= 0x40;

            let mut channel = SecureChannel::new(keys.clone(), 0);
            match channel.unwrap(&tampered) {
                Err(MrtdError::SecureMessagingIntegrity(_)) => {}
                other => panic!(
                    "flipping byte {i} produced {:?} instead of an integrity failure",
                    other.map(|(p, sw)| (p.len(), sw))
                ),
            }
        }
    }

    #[test]
    fn test_unwrap_missing_mac() {
        let mut channel = SecureChannel::new(test_keys(), 0);
        let response = ApduResponse {
            data: vec![0x99, 0x02, 0x90, 0x00],
            sw1: 0x90,
            sw2: 0x00,
        };
        assert!(matches!(
            channel.unwrap(&response),
            Err(MrtdError::SecureMessagingIntegrity("response carries no MAC"))
        ));
    }
}
