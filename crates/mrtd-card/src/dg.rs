//! Data group extraction
//!
//! Maps the flattened TLV content of DG1, DG2 and DG11 (plus EF.COM) into
//! structured fields. All input is decrypted file content straight off the
//! chip and treated as untrusted.

use mrtd_common::tlv;

use crate::error::MrtdError;

/// Elementary file identifiers on the travel document applet
pub mod files {
    /// EF.COM, the data group presence list
    pub const EF_COM: [u8; 2] = [0x01, 0x1E];
    /// EF.SOD, the signed security object
    pub const EF_SOD: [u8; 2] = [0x01, 0x1D];

    /// File identifier for a data group (1-16)
    pub fn data_group(dg: u8) -> [u8; 2] {
        debug_assert!((1..=16).contains(&dg));
        [0x01, dg]
    }
}

/// A decoded JPEG family marker inside a biometric data block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Jpeg2000,
}

/// Biometric image located inside a DG2 template
#[derive(Debug, Clone)]
pub struct BiometricImage {
    /// Biometric format owner bytes (tag 87)
    pub format_owner: Vec<u8>,
    /// Biometric format type bytes (tag 88)
    pub format_type: Vec<u8>,
    /// Detected payload encoding
    pub format: ImageFormat,
    /// Image bytes, starting exactly at the detected marker
    pub image: Vec<u8>,
}

/// Fields extracted from DG2
#[derive(Debug, Clone, Default)]
pub struct Dg2Data {
    pub format_owner: Vec<u8>,
    pub format_type: Vec<u8>,
    /// Raw biometric data block (tag 5F2E)
    pub biometric_block: Vec<u8>,
    /// Best-effort text of unrecognized tags
    pub raw_text: String,
}

/// Fields extracted from DG11 (additional personal details)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dg11Data {
    pub first_name: Option<String>,
    pub second_name: Option<String>,
    pub third_name: Option<String>,
    pub last_name: Option<String>,
    pub mothers_first_name: Option<String>,
    pub personal_id_number: Option<String>,
    pub address: Option<String>,
    pub gender: Option<String>,
}

/// Merged personal data view built from DG1 and DG11.
///
/// Filled by the extractors during a read, immutable once handed to the
/// caller.
#[derive(Debug, Clone, Default)]
pub struct IdDocument {
    pub document_code: String,
    pub issuing_state: String,
    pub document_number: String,
    pub optional_data: Option<String>,
    pub birth_date: String,
    pub expiry_date: String,
    pub sex: String,
    pub nationality: String,
    /// Surname from the MRZ name field
    pub primary_identifier: String,
    /// Given names from the MRZ name field
    pub secondary_identifier: String,

    // DG11 supplements
    pub first_name: Option<String>,
    pub second_name: Option<String>,
    pub third_name: Option<String>,
    pub last_name: Option<String>,
    pub mothers_first_name: Option<String>,
    pub personal_id_number: Option<String>,
    pub address: Option<String>,
    pub gender: Option<String>,

    /// Raw DG1 bytes for auditing
    pub dg1_raw: Vec<u8>,
    /// Face image from DG2, when read
    pub image: Option<BiometricImage>,
    /// SOD validator verdict, when validation ran
    pub validity_info: Option<String>,
    /// When the read completed
    pub read_at: Option<std::time::SystemTime>,
}

impl IdDocument {
    /// Fold DG11 fields into the merged record
    pub fn merge_dg11(&mut self, dg11: Dg11Data) {
        self.first_name = dg11.first_name;
        self.second_name = dg11.second_name;
        self.third_name = dg11.third_name;
        self.last_name = dg11.last_name;
        self.mothers_first_name = dg11.mothers_first_name;
        self.personal_id_number = dg11.personal_id_number;
        self.address = dg11.address;
        if dg11.gender.is_some() {
            self.gender = dg11.gender;
        }
    }
}

const INVALID_UTF8: &str = "[Invalid UTF-8]";

fn decode_utf8(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => INVALID_UTF8.to_string(),
    }
}

/// Split an MRZ-style name on the filler character, dropping empty parts
fn name_parts(raw: &str) -> Vec<&str> {
    raw.split('<').filter(|p| !p.is_empty()).collect()
}

/// Extract DG11 fields from the raw file bytes
pub fn extract_dg11(data: &[u8]) -> Result<Dg11Data, MrtdError> {
    let tlvs = tlv::parse(data)?;
    let mut result = Dg11Data::default();

    for element in &tlvs {
        match element.tag.as_slice() {
            [0x5F, 0x0E] => {
                let full = decode_utf8(&element.value);
                let parts = name_parts(&full);
                result.first_name = parts.first().map(|s| s.to_string());
                result.second_name = parts.get(1).map(|s| s.to_string());
                result.third_name = parts.get(2).map(|s| s.to_string());
                result.last_name = parts.get(3).map(|s| s.to_string());
            }
            [0x5F, 0x0F] => {
                let full = decode_utf8(&element.value);
                result.mothers_first_name = name_parts(&full).first().map(|s| s.to_string());
            }
            [0x5F, 0x10] => {
                result.personal_id_number = Some(
                    element
                        .value
                        .iter()
                        .map(|&b| if b.is_ascii() { b as char } else { '?' })
                        .collect(),
                );
            }
            [0x5F, 0x11] => {
                result.address = Some(decode_utf8(&element.value));
            }
            _ => {}
        }
    }

    // The gender template (tag A0) is constructed, so its INTEGER content
    // is flattened away above; locate the template in the raw stream
    // instead and read the enumerated code out of it.
    if let Some(value) = tlv::find_tag(data, &[0xA0]).or_else(|| {
        tlv::find_tag(data, &[0x6B]).and_then(|inner| tlv::find_tag(inner, &[0xA0]))
    }) {
        if value.len() >= 3 && value[0] == 0x02 && value[1] == 0x01 {
            result.gender = Some(
                match value[2] {
                    0x01 => "Male",
                    0x02 => "Female",
                    _ => "Unknown",
                }
                .to_string(),
            );
        }
    }

    Ok(result)
}

/// Extract the DG2 biometric template fields from the raw file bytes
pub fn extract_dg2(data: &[u8]) -> Result<Dg2Data, MrtdError> {
    let tlvs = tlv::parse(data)?;
    let mut result = Dg2Data::default();

    for element in &tlvs {
        match element.tag.as_slice() {
            [0x5F, 0x2E] => result.biometric_block = element.value.clone(),
            [0x87] => result.format_owner = element.value.clone(),
            [0x88] => result.format_type = element.value.clone(),
            _ => result.raw_text.push_str(&decode_utf8(&element.value)),
        }
    }

    Ok(result)
}

/// JPEG start-of-image marker
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG2000 signature box
const JPEG2000_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];

impl Dg2Data {
    /// Locate the image payload inside the biometric data block.
    ///
    /// The block carries an ISO 19794-5 facial record header of variable
    /// length before the actual image, so the payload boundary is found by
    /// scanning for a recognized start marker rather than assuming offset
    /// zero. Returns everything from the first marker to the end of the
    /// block.
    pub fn extract_image(&self) -> Result<BiometricImage, MrtdError> {
        let block = &self.biometric_block;

        let jpeg = find_marker(block, &JPEG_SOI);
        let jp2 = find_marker(block, &JPEG2000_SIGNATURE);

        let (format, start) = match (jpeg, jp2) {
            (Some(j), Some(k)) if k < j => (ImageFormat::Jpeg2000, k),
            (Some(j), _) => (ImageFormat::Jpeg, j),
            (None, Some(k)) => (ImageFormat::Jpeg2000, k),
            (None, None) => return Err(MrtdError::ImageMarkerNotFound),
        };

        Ok(BiometricImage {
            format_owner: self.format_owner.clone(),
            format_type: self.format_type.clone(),
            format,
            image: block[start..].to_vec(),
        })
    }
}

fn find_marker(haystack: &[u8], marker: &[u8]) -> Option<usize> {
    haystack
        .windows(marker.len())
        .position(|window| window == marker)
}

/// Describe a biometric format owner/type pair per the ICAO/ISO registries
pub fn format_description(owner: &[u8], format_type: &[u8]) -> String {
    match (owner, format_type) {
        ([0x01, 0x01], [0x00, 0x01]) => "Facial Image (ISO/IEC 19794-5:2005)".into(),
        ([0x01, 0x01], [0x00, 0x08]) => "Facial Image (ISO/IEC 19794-5:2011)".into(),
        ([0x01, 0x01], [0x02, 0x00]) => "Fingerprint (ISO/IEC 19794-4)".into(),
        ([0x01, 0x01], [0x03, 0x00]) => "Iris Image (ISO/IEC 19794-6)".into(),
        ([0x01, 0x01], [0x04, 0x00]) => "Signature/Handwriting (ISO/IEC 19794-7)".into(),
        ([0x01, 0x01], [0x05, 0x00]) => "Voice (ISO/IEC 19794-13)".into(),
        ([0x01, 0x01], [0x06, 0x00]) => "DNA (ISO/IEC 19794-14)".into(),
        _ => format!(
            "Unknown Format (Owner: {}, Type: {})",
            hex::encode_upper(owner),
            hex::encode_upper(format_type)
        ),
    }
}

/// Data groups a document claims to carry, from the EF.COM tag list (5C).
pub fn claimed_data_groups(ef_com: &[u8]) -> Result<Vec<u8>, MrtdError> {
    let tlvs = tlv::parse(ef_com)?;
    let list = tlvs
        .iter()
        .find(|t| t.tag == [0x5C])
        .map(|t| t.value.as_slice())
        .unwrap_or(&[]);

    Ok(list
        .iter()
        .filter_map(|tag| match tag {
            0x61 => Some(1),
            0x75 => Some(2),
            0x63 => Some(3),
            0x76 => Some(4),
            0x65 => Some(5),
            0x66 => Some(6),
            0x67 => Some(7),
            0x68 => Some(8),
            0x69 => Some(9),
            0x6A => Some(10),
            0x6B => Some(11),
            0x6C => Some(12),
            0x6D => Some(13),
            0x6E => Some(14),
            0x6F => Some(15),
            0x70 => Some(16),
            _ => None,
        })
        .collect())
}

/// Parse DG1 into the merged document record.
///
/// The MRZ text sits under tag 5F1F; TD1 (three 30-character lines) and
/// TD3 (two 44-character lines) layouts are supported. Check digits over
/// the document number and dates are recomputed and verified.
pub fn parse_dg1(data: &[u8]) -> Result<IdDocument, MrtdError> {
    let tlvs = tlv::parse(data)?;
    let mrz_bytes = tlvs
        .iter()
        .find(|t| t.tag == [0x5F, 0x1F])
        .map(|t| t.value.clone())
        .ok_or_else(|| MrtdError::Parse("DG1 carries no MRZ data (tag 5F1F)".into()))?;

    let mrz = String::from_utf8(mrz_bytes)
        .map_err(|_| MrtdError::Parse("MRZ data is not valid ASCII".into()))?;
    // The layout parsers slice by byte offset, which is only sound on
    // single-byte characters
    if !mrz.is_ascii() {
        return Err(MrtdError::Parse(
            "MRZ data contains non-ASCII characters".into(),
        ));
    }

    match mrz.len() {
        90 => parse_td1(&mrz),
        88 => parse_td3(&mrz),
        other => Err(MrtdError::Parse(format!(
            "unsupported MRZ length {other} (expected 90 for TD1 or 88 for TD3)"
        ))),
    }
}

fn verify_field_digit(field: &str, digit: char, what: &str) -> Result<(), MrtdError> {
    let expected = crate::crypto::check_digit(field)
        .map_err(|_| MrtdError::Parse(format!("invalid characters in MRZ {what}")))?;
    if digit != char::from(b'0' + expected) {
        return Err(MrtdError::Parse(format!("MRZ check digit mismatch on {what}")));
    }
    Ok(())
}

fn split_name(field: &str) -> (String, String) {
    let trimmed = field.trim_end_matches('<');
    let (primary, secondary) = match trimmed.split_once("<<") {
        Some((p, s)) => (p, s),
        None => (trimmed, ""),
    };
    (
        primary.replace('<', " ").trim().to_string(),
        secondary.replace('<', " ").trim().to_string(),
    )
}

fn strip_filler(field: &str) -> String {
    field.trim_matches('<').replace('<', " ")
}

/// TD1: identity cards, three lines of 30 characters
fn parse_td1(mrz: &str) -> Result<IdDocument, MrtdError> {
    let line1 = &mrz[0..30];
    let line2 = &mrz[30..60];
    let line3 = &mrz[60..90];

    let document_number = &line1[5..14];
    verify_field_digit(
        document_number,
        line1.as_bytes()[14] as char,
        "document number",
    )?;
    let birth = &line2[0..6];
    verify_field_digit(birth, line2.as_bytes()[6] as char, "date of birth")?;
    let expiry = &line2[8..14];
    verify_field_digit(expiry, line2.as_bytes()[14] as char, "date of expiry")?;

    let (primary, secondary) = split_name(line3);
    let optional = strip_filler(&line1[15..30]);

    Ok(IdDocument {
        document_code: strip_filler(&line1[0..2]),
        issuing_state: strip_filler(&line1[2..5]),
        document_number: document_number.trim_end_matches('<').to_string(),
        optional_data: (!optional.is_empty()).then_some(optional),
        birth_date: birth.to_string(),
        expiry_date: expiry.to_string(),
        sex: line2[7..8].replace('<', "U"),
        nationality: strip_filler(&line2[15..18]),
        primary_identifier: primary,
        secondary_identifier: secondary,
        ..IdDocument::default()
    })
}

/// TD3: passports, two lines of 44 characters
fn parse_td3(mrz: &str) -> Result<IdDocument, MrtdError> {
    let line1 = &mrz[0..44];
    let line2 = &mrz[44..88];

    let document_number = &line2[0..9];
    verify_field_digit(
        document_number,
        line2.as_bytes()[9] as char,
        "document number",
    )?;
    let birth = &line2[13..19];
    verify_field_digit(birth, line2.as_bytes()[19] as char, "date of birth")?;
    let expiry = &line2[21..27];
    verify_field_digit(expiry, line2.as_bytes()[27] as char, "date of expiry")?;

    let (primary, secondary) = split_name(&line1[5..44]);
    let optional = strip_filler(&line2[28..42]);

    Ok(IdDocument {
        document_code: strip_filler(&line1[0..2]),
        issuing_state: strip_filler(&line1[2..5]),
        document_number: document_number.trim_end_matches('<').to_string(),
        optional_data: (!optional.is_empty()).then_some(optional),
        birth_date: birth.to_string(),
        expiry_date: expiry.to_string(),
        sex: line2[20..21].replace('<', "U"),
        nationality: strip_filler(&line2[10..13]),
        primary_identifier: primary,
        secondary_identifier: secondary,
        ..IdDocument::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrtd_common::tlv::encode_length;

    fn wrap(tag: &[u8], value: &[u8]) -> Vec<u8> {
        let mut out = tag.to_vec();
        encode_length(&mut out, value.len());
        out.extend_from_slice(value);
        out
    }

    #[test]
    fn test_dg11_full_name_split() {
        let inner = wrap(&[0x5F, 0x0E], b"JOHN<PAUL<DOE");
        let data = wrap(&[0x6B], &inner);

        let dg11 = extract_dg11(&data).unwrap();
        assert_eq!(dg11.first_name.as_deref(), Some("JOHN"));
        assert_eq!(dg11.second_name.as_deref(), Some("PAUL"));
        assert_eq!(dg11.third_name.as_deref(), Some("DOE"));
        assert_eq!(dg11.last_name, None);
    }

    #[test]
    fn test_dg11_gender_template() {
        let gender = wrap(&[0xA0], &[0x02, 0x01, 0x02]);
        let data = wrap(&[0x6B], &gender);

        let dg11 = extract_dg11(&data).unwrap();
        assert_eq!(dg11.gender.as_deref(), Some("Female"));

        let gender = wrap(&[0xA0], &[0x02, 0x01, 0x01]);
        let dg11 = extract_dg11(&wrap(&[0x6B], &gender)).unwrap();
        assert_eq!(dg11.gender.as_deref(), Some("Male"));

        let gender = wrap(&[0xA0], &[0x02, 0x01, 0x09]);
        let dg11 = extract_dg11(&wrap(&[0x6B], &gender)).unwrap();
        assert_eq!(dg11.gender.as_deref(), Some("Unknown"));
    }

    #[test]
    fn test_dg11_address_invalid_utf8() {
        let addr = wrap(&[0x5F, 0x11], &[0xFF, 0xFE, 0x41]);
        let data = wrap(&[0x6B], &addr);
        let dg11 = extract_dg11(&data).unwrap();
        assert_eq!(dg11.address.as_deref(), Some("[Invalid UTF-8]"));
    }

    #[test]
    fn test_dg11_mothers_name_and_personal_number() {
        let mut inner = wrap(&[0x5F, 0x0F], b"MARIA<ANNE");
        inner.extend(wrap(&[0x5F, 0x10], b"1234567890"));
        let data = wrap(&[0x6B], &inner);

        let dg11 = extract_dg11(&data).unwrap();
        assert_eq!(dg11.mothers_first_name.as_deref(), Some("MARIA"));
        assert_eq!(dg11.personal_id_number.as_deref(), Some("1234567890"));
    }

    #[test]
    fn test_dg2_extraction_and_image_marker() {
        let mut block = vec![0x00, 0x01, 0x02, 0x03]; // facial record header bytes
        block.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0, 0x10]);

        let mut inner = wrap(&[0x87], &[0x04]);
        inner.extend(wrap(&[0x88], &[0x05]));
        inner.extend(wrap(&[0x5F, 0x2E], &block));
        let data = wrap(&[0x75], &inner);

        let dg2 = extract_dg2(&data).unwrap();
        assert_eq!(dg2.format_owner, vec![0x04]);
        assert_eq!(dg2.format_type, vec![0x05]);

        let image = dg2.extract_image().unwrap();
        assert_eq!(image.format, ImageFormat::Jpeg);
        // Image starts exactly at the SOI marker
        assert_eq!(&image.image[..2], &[0xFF, 0xD8]);
        assert_eq!(image.image.len(), 5);
    }

    #[test]
    fn test_dg2_jpeg2000_signature() {
        let mut block = vec![0xAA; 7];
        block.extend_from_slice(&JPEG2000_SIGNATURE);
        block.extend_from_slice(&[0x01, 0x02]);

        let dg2 = Dg2Data {
            biometric_block: block,
            ..Dg2Data::default()
        };
        let image = dg2.extract_image().unwrap();
        assert_eq!(image.format, ImageFormat::Jpeg2000);
        assert_eq!(&image.image[..4], &[0x00, 0x00, 0x00, 0x0C]);
    }

    #[test]
    fn test_dg2_missing_marker() {
        let dg2 = Dg2Data {
            biometric_block: vec![0x00; 64],
            ..Dg2Data::default()
        };
        assert!(matches!(
            dg2.extract_image(),
            Err(MrtdError::ImageMarkerNotFound)
        ));
    }

    #[test]
    fn test_format_description() {
        assert_eq!(
            format_description(&[0x01, 0x01], &[0x00, 0x08]),
            "Facial Image (ISO/IEC 19794-5:2011)"
        );
        assert!(format_description(&[0x09], &[0x09]).starts_with("Unknown Format"));
    }

    #[test]
    fn test_claimed_data_groups() {
        let list = wrap(&[0x5C], &[0x61, 0x75, 0x6B]);
        let data = wrap(&[0x60], &list);
        assert_eq!(claimed_data_groups(&data).unwrap(), vec![1, 2, 11]);
    }

    fn td3_sample() -> String {
        // Doc 9303 specimen layout: UTOPIA passport for ERIKSSON, ANNA MARIA
        let line1 = "P<UTOERIKSSON<<ANNA<MARIA<<<<<<<<<<<<<<<<<<<";
        let line2 = "L898902C36UTO6908061F9406236ZE184226B<<<<<14";
        format!("{line1}{line2}")
    }

    #[test]
    fn test_parse_dg1_td3() {
        let mrz = td3_sample();
        let data = {
            let inner = wrap(&[0x5F, 0x1F], mrz.as_bytes());
            wrap(&[0x61], &inner)
        };

        let doc = parse_dg1(&data).unwrap();
        assert_eq!(doc.document_code, "P");
        assert_eq!(doc.issuing_state, "UTO");
        assert_eq!(doc.document_number, "L898902C3");
        assert_eq!(doc.birth_date, "690806");
        assert_eq!(doc.expiry_date, "940623");
        assert_eq!(doc.sex, "F");
        assert_eq!(doc.nationality, "UTO");
        assert_eq!(doc.primary_identifier, "ERIKSSON");
        assert_eq!(doc.secondary_identifier, "ANNA MARIA");
        assert_eq!(doc.optional_data.as_deref(), Some("ZE184226B"));
    }

    #[test]
    fn test_parse_dg1_check_digit_mismatch() {
        let mut mrz = td3_sample();
        // Corrupt the document number check digit
        mrz.replace_range(53..54, "7");
        let inner = wrap(&[0x5F, 0x1F], mrz.as_bytes());
        let data = wrap(&[0x61], &inner);

        assert!(matches!(parse_dg1(&data), Err(MrtdError::Parse(_))));
    }

    #[test]
    fn test_parse_dg1_rejects_non_ascii_mrz() {
        let mut mrz = td3_sample();
        // Two-byte character straddling a field slice boundary; the byte
        // length still reads as a TD3 layout
        mrz.replace_range(43..45, "é");
        assert_eq!(mrz.len(), 88);

        let inner = wrap(&[0x5F, 0x1F], mrz.as_bytes());
        let data = wrap(&[0x61], &inner);
        assert!(matches!(parse_dg1(&data), Err(MrtdError::Parse(_))));
    }

    #[test]
    fn test_parse_dg1_td1() {
        let line1 = "I<UTOD231458907<<<<<<<<<<<<<<<";
        let line2 = "7408122F1204159UTO<<<<<<<<<<<6";
        let line3 = "ERIKSSON<<ANNA<MARIA<<<<<<<<<<";
        let mrz = format!("{line1}{line2}{line3}");
        let inner = wrap(&[0x5F, 0x1F], mrz.as_bytes());
        let data = wrap(&[0x61], &inner);

        let doc = parse_dg1(&data).unwrap();
        assert_eq!(doc.document_code, "I");
        assert_eq!(doc.document_number, "D23145890");
        assert_eq!(doc.birth_date, "740812");
        assert_eq!(doc.sex, "F");
        assert_eq!(doc.expiry_date, "120415");
        assert_eq!(doc.nationality, "UTO");
        assert_eq!(doc.primary_identifier, "ERIKSSON");
        assert_eq!(doc.secondary_identifier, "ANNA MARIA");
    }

    #[test]
    fn test_parse_dg1_missing_mrz_tag() {
        let data = wrap(&[0x61], &wrap(&[0x5F, 0x20], b"nope"));
        assert!(matches!(parse_dg1(&data), Err(MrtdError::Parse(_))));
    }

    #[test]
    fn test_merge_dg11() {
        let mut doc = IdDocument::default();
        doc.merge_dg11(Dg11Data {
            first_name: Some("JOHN".into()),
            gender: Some("Male".into()),
            ..Dg11Data::default()
        });
        assert_eq!(doc.first_name.as_deref(), Some("JOHN"));
        assert_eq!(doc.gender.as_deref(), Some("Male"));
    }
}
