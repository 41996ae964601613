//! Cryptographic operations for Basic Access Control
//!
//! MRZ-derived key agreement plus the symmetric primitives the protocol is
//! built on: two-key 3DES in CBC mode (zero IV, block-aligned input only)
//! and the DES retail MAC (ISO/IEC 9797-1 algorithm 3) with ISO 7816-4
//! padding.

use des::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use des::{Des, TdesEde2};
use sha1::{Digest, Sha1};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::MrtdError;

/// DES block size in bytes
pub const BLOCK_SIZE: usize = 8;

/// Fixed MRZ document number field width
const DOC_NUMBER_LEN: usize = 9;

/// MRZ filler character
const FILLER: char = '<';

/// Session key pair for one authenticated session.
///
/// Created by key derivation, owned by exactly one session, wiped on drop.
/// Never persisted and never reused across sessions.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Encryption key (DES-parity adjusted)
    pub k_enc: [u8; 16],
    /// MAC key (DES-parity adjusted)
    pub k_mac: [u8; 16],
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes stay out of logs and error chains
        f.write_str("SessionKeys { .. }")
    }
}

/// Normalized MRZ key material: document number, birth date and expiry
/// date as they appear in the machine readable zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrzKey {
    document_number: String,
    birth_date: String,
    expiry_date: String,
}

impl MrzKey {
    /// Validate and normalize MRZ input.
    ///
    /// The document number is uppercased and filler-padded to nine
    /// characters; dates must be exactly six digits (YYMMDD). Check digits
    /// are always recomputed later, never taken from input.
    pub fn new(
        document_number: &str,
        birth_date: &str,
        expiry_date: &str,
    ) -> Result<Self, MrtdError> {
        let doc = document_number.trim().to_uppercase().replace(' ', "");
        if doc.is_empty() || doc.len() > DOC_NUMBER_LEN {
            return Err(MrtdError::InvalidMrzFormat(format!(
                "document number must be 1-{} characters, got {}",
                DOC_NUMBER_LEN,
                doc.len()
            )));
        }
        if !doc.chars().all(|c| c.is_ascii_alphanumeric() || c == FILLER) {
            return Err(MrtdError::InvalidMrzFormat(
                "document number may only contain A-Z, 0-9 and '<'".into(),
            ));
        }

        let birth = validate_date(birth_date, "date of birth")?;
        let expiry = validate_date(expiry_date, "date of expiry")?;

        let mut padded = doc;
        while padded.len() < DOC_NUMBER_LEN {
            padded.push(FILLER);
        }

        Ok(Self {
            document_number: padded,
            birth_date: birth,
            expiry_date: expiry,
        })
    }

    /// The filler-padded document number
    pub fn document_number(&self) -> &str {
        &self.document_number
    }

    /// Build the MRZ information string and derive the BAC seed keys.
    ///
    /// Information string is each field followed by its freshly computed
    /// check digit: `doc+cd || birth+cd || expiry+cd`.
    pub fn seed_keys(&self) -> Result<SessionKeys, MrtdError> {
        let mut info = String::with_capacity(24);
        for field in [
            self.document_number.as_str(),
            self.birth_date.as_str(),
            self.expiry_date.as_str(),
        ] {
            info.push_str(field);
            info.push(char::from(b'0' + check_digit(field)?));
        }
        Ok(derive_session_keys(info.as_bytes()))
    }
}

fn validate_date(input: &str, what: &str) -> Result<String, MrtdError> {
    let date = input.trim();
    if date.len() != 6 || !date.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MrtdError::InvalidMrzFormat(format!(
            "{what} must be exactly 6 digits (YYMMDD)"
        )));
    }
    Ok(date.to_string())
}

/// ICAO 9303 check digit: weights 7/3/1 cycling over the positions,
/// digits map to their value, letters to ordinal+10, filler to 0;
/// result is the weighted sum mod 10.
pub fn check_digit(field: &str) -> Result<u8, MrtdError> {
    const WEIGHTS: [u32; 3] = [7, 3, 1];

    let mut sum: u32 = 0;
    for (i, c) in field.chars().enumerate() {
        let value = match c {
            '0'..='9' => c as u32 - '0' as u32,
            'A'..='Z' => c as u32 - 'A' as u32 + 10,
            FILLER => 0,
            other => {
                return Err(MrtdError::InvalidMrzFormat(format!(
                    "invalid MRZ character '{other}'"
                )))
            }
        };
        sum += value * WEIGHTS[i % 3];
    }
    Ok((sum % 10) as u8)
}

/// Derive a session key pair from arbitrary seed material.
///
/// SHA-1 the input, take the first 16 digest bytes as halves A and B,
/// force odd DES parity on every byte; KEnc = A||B, KMac = B||A. Used both
/// for the MRZ information string and for the post-BAC K.IFD xor K.IC
/// seed.
pub fn derive_session_keys(seed: &[u8]) -> SessionKeys {
    let digest = Sha1::digest(seed);

    let mut a: [u8; 8] = digest[0..8].try_into().unwrap();
    let mut b: [u8; 8] = digest[8..16].try_into().unwrap();
    adjust_parity(&mut a);
    adjust_parity(&mut b);

    let mut k_enc = [0u8; 16];
    k_enc[..8].copy_from_slice(&a);
    k_enc[8..].copy_from_slice(&b);

    let mut k_mac = [0u8; 16];
    k_mac[..8].copy_from_slice(&b);
    k_mac[8..].copy_from_slice(&a);

    a.zeroize();
    b.zeroize();

    SessionKeys { k_enc, k_mac }
}

/// Force odd parity on every byte, as DES key schedules require: the low
/// bit is flipped whenever the byte holds an even number of one-bits.
pub fn adjust_parity(key: &mut [u8]) {
    for byte in key.iter_mut() {
        if byte.count_ones() % 2 == 0 {
            *byte ^= 1;
        }
    }
}

/// ISO 7816-4 padding: append 0x80, then zero-fill to a multiple of the
/// block size.
pub fn pad_iso7816(data: &[u8]) -> Vec<u8> {
    let mut padded = data.to_vec();
    padded.push(0x80);
    while padded.len() % BLOCK_SIZE != 0 {
        padded.push(0x00);
    }
    padded
}

/// Strip ISO 7816-4 padding, failing when no 0x80 marker is present.
pub fn unpad_iso7816(data: &[u8]) -> Result<Vec<u8>, MrtdError> {
    let mut end = data.len();
    while end > 0 && data[end - 1] == 0x00 {
        end -= 1;
    }
    if end == 0 || data[end - 1] != 0x80 {
        return Err(MrtdError::Parse("invalid ISO 7816-4 padding".into()));
    }
    Ok(data[..end - 1].to_vec())
}

/// Two-key 3DES CBC encryption with a zero IV over block-aligned input.
pub fn tdes_cbc_encrypt(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    debug_assert_eq!(data.len() % BLOCK_SIZE, 0);
    let cipher = TdesEde2::new(GenericArray::from_slice(key));

    let mut out = Vec::with_capacity(data.len());
    let mut chain = [0u8; BLOCK_SIZE];
    for block in data.chunks(BLOCK_SIZE) {
        for (c, b) in chain.iter_mut().zip(block) {
            *c ^= b;
        }
        let mut buf = GenericArray::clone_from_slice(&chain);
        cipher.encrypt_block(&mut buf);
        chain.copy_from_slice(&buf);
        out.extend_from_slice(&buf);
    }
    out
}

/// Two-key 3DES CBC decryption with a zero IV over block-aligned input.
pub fn tdes_cbc_decrypt(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    debug_assert_eq!(data.len() % BLOCK_SIZE, 0);
    let cipher = TdesEde2::new(GenericArray::from_slice(key));

    let mut out = Vec::with_capacity(data.len());
    let mut chain = [0u8; BLOCK_SIZE];
    for block in data.chunks(BLOCK_SIZE) {
        let mut buf = GenericArray::clone_from_slice(block);
        cipher.decrypt_block(&mut buf);
        for (p, c) in buf.iter_mut().zip(chain.iter()) {
            *p ^= c;
        }
        out.extend_from_slice(&buf);
        chain.copy_from_slice(block);
    }
    out
}

/// DES retail MAC (ISO/IEC 9797-1 MAC algorithm 3) over `data`, which is
/// ISO 7816-4 padded internally: single-DES CBC-MAC under the first key
/// half, then a decrypt/encrypt finalization with the second and first
/// halves.
pub fn retail_mac(k_mac: &[u8; 16], data: &[u8]) -> [u8; 8] {
    let des1 = Des::new(GenericArray::from_slice(&k_mac[..8]));
    let des2 = Des::new(GenericArray::from_slice(&k_mac[8..]));

    let padded = pad_iso7816(data);

    let mut state = [0u8; BLOCK_SIZE];
    for block in padded.chunks(BLOCK_SIZE) {
        for (s, b) in state.iter_mut().zip(block) {
            *s ^= b;
        }
        let mut buf = GenericArray::clone_from_slice(&state);
        des1.encrypt_block(&mut buf);
        state.copy_from_slice(&buf);
    }

    let mut buf = GenericArray::clone_from_slice(&state);
    des2.decrypt_block(&mut buf);
    des1.encrypt_block(&mut buf);
    state.copy_from_slice(&buf);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_check_digit_reference_vector() {
        // ICAO Doc 9303 reference vector
        assert_eq!(check_digit("L898902C3").unwrap(), 6);
        // Worked-example fields
        assert_eq!(check_digit("L898902C<").unwrap(), 3);
        assert_eq!(check_digit("690806").unwrap(), 1);
        assert_eq!(check_digit("940623").unwrap(), 6);
    }

    #[test]
    fn test_check_digit_rejects_invalid_characters() {
        assert!(check_digit("AB?12").is_err());
    }

    #[test]
    fn test_mrz_key_validation() {
        assert!(MrzKey::new("L898902C", "690806", "940623").is_ok());
        // Too long
        assert!(matches!(
            MrzKey::new("L898902C3XX", "690806", "940623"),
            Err(MrtdError::InvalidMrzFormat(_))
        ));
        // Dates must be 6 digits
        assert!(MrzKey::new("L898902C", "1969-08", "940623").is_err());
        assert!(MrzKey::new("L898902C", "69080", "940623").is_err());
    }

    #[test]
    fn test_mrz_key_normalization() {
        let key = MrzKey::new("l898902c", " 690806 ", "940623").unwrap();
        assert_eq!(key.document_number(), "L898902C<");
    }

    #[test]
    fn test_seed_keys_match_worked_example_digest() {
        // ICAO worked example: SHA-1("L898902C<369080619406236") starts
        // with 239AB9CB282DAF66231DC5A4DF6BFBAE. The derived key bytes are
        // those digest bytes with parity forced, so each byte differs from
        // the digest in at most the low bit.
        let expected = hex!("239AB9CB282DAF66231DC5A4DF6BFBAE");

        let key = MrzKey::new("L898902C", "690806", "940623").unwrap();
        let keys = key.seed_keys().unwrap();

        for (i, &digest_byte) in expected.iter().enumerate() {
            assert!(keys.k_enc[i] ^ digest_byte <= 1, "byte {i} diverges");
        }
        // KMac is the swapped halves
        assert_eq!(keys.k_mac[..8], keys.k_enc[8..]);
        assert_eq!(keys.k_mac[8..], keys.k_enc[..8]);
    }

    #[test]
    fn test_derived_keys_have_odd_parity() {
        let keys = derive_session_keys(b"arbitrary seed material");
        for byte in keys.k_enc.iter().chain(keys.k_mac.iter()) {
            assert_eq!(byte.count_ones() % 2, 1, "byte {byte:02X} has even parity");
        }
    }

    #[test]
    fn test_padding_roundtrip() {
        let padded = pad_iso7816(&[0x01, 0x02, 0x03]);
        assert_eq!(padded.len(), 8);
        assert_eq!(padded[3], 0x80);
        assert_eq!(unpad_iso7816(&padded).unwrap(), vec![0x01, 0x02, 0x03]);

        // Already block aligned grows by a full block
        let padded = pad_iso7816(&[0xFF; 8]);
        assert_eq!(padded.len(), 16);

        assert!(unpad_iso7816(&[0x00; 8]).is_err());
    }

    #[test]
    fn test_tdes_cbc_roundtrip() {
        let keys = derive_session_keys(b"cbc test");
        let plaintext = [0x42u8; 32];
        let ciphertext = tdes_cbc_encrypt(&keys.k_enc, &plaintext);
        assert_ne!(ciphertext, plaintext);
        // CBC chaining makes identical blocks encrypt differently
        assert_ne!(ciphertext[0..8], ciphertext[8..16]);
        assert_eq!(tdes_cbc_decrypt(&keys.k_enc, &ciphertext), plaintext);
    }

    #[test]
    fn test_retail_mac_properties() {
        let keys = derive_session_keys(b"mac test");
        let mac1 = retail_mac(&keys.k_mac, b"some protected data");
        let mac2 = retail_mac(&keys.k_mac, b"some protected data");
        let mac3 = retail_mac(&keys.k_mac, b"some protected dat4");
        assert_eq!(mac1, mac2);
        assert_ne!(mac1, mac3);

        let other = derive_session_keys(b"other keys");
        assert_ne!(retail_mac(&other.k_mac, b"some protected data"), mac1);
    }
}
