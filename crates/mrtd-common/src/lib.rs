//! MRTD Common - Shared TLV parsing and ICAO tag definitions for travel document processing

pub mod tlv;

pub use tlv::{find_tag, Tlv, TlvError};

/// ICAO data group tag identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IcaoTag(pub &'static [u8]);

/// Common ICAO 9303 tags found in travel document data groups
pub mod tags {
    use super::IcaoTag;

    // Data group wrappers
    pub const DG1_TEMPLATE: IcaoTag = IcaoTag(&[0x61]);
    pub const DG2_TEMPLATE: IcaoTag = IcaoTag(&[0x75]);
    pub const DG11_TEMPLATE: IcaoTag = IcaoTag(&[0x6B]);
    pub const EF_COM_TEMPLATE: IcaoTag = IcaoTag(&[0x60]);
    pub const EF_SOD_TEMPLATE: IcaoTag = IcaoTag(&[0x77]);

    // DG1
    pub const MRZ_DATA: IcaoTag = IcaoTag(&[0x5F, 0x1F]);

    // DG2 biometric template
    pub const BIOMETRIC_DATA_BLOCK: IcaoTag = IcaoTag(&[0x5F, 0x2E]);
    pub const FORMAT_OWNER: IcaoTag = IcaoTag(&[0x87]);
    pub const FORMAT_TYPE: IcaoTag = IcaoTag(&[0x88]);

    // DG11 additional personal details
    pub const FULL_NAME: IcaoTag = IcaoTag(&[0x5F, 0x0E]);
    pub const MOTHERS_NAME: IcaoTag = IcaoTag(&[0x5F, 0x0F]);
    pub const PERSONAL_ID_NUMBER: IcaoTag = IcaoTag(&[0x5F, 0x10]);
    pub const ADDRESS: IcaoTag = IcaoTag(&[0x5F, 0x11]);
    pub const GENDER_TEMPLATE: IcaoTag = IcaoTag(&[0xA0]);

    // EF.COM
    pub const LDS_VERSION: IcaoTag = IcaoTag(&[0x5F, 0x01]);
    pub const UNICODE_VERSION: IcaoTag = IcaoTag(&[0x5F, 0x36]);
    pub const DATA_GROUP_TAG_LIST: IcaoTag = IcaoTag(&[0x5C]);

    // Secure messaging data objects
    pub const DO_ENCRYPTED_DATA: IcaoTag = IcaoTag(&[0x87]);
    pub const DO_EXPECTED_LENGTH: IcaoTag = IcaoTag(&[0x97]);
    pub const DO_STATUS_WORD: IcaoTag = IcaoTag(&[0x99]);
    pub const DO_MAC: IcaoTag = IcaoTag(&[0x8E]);
}

/// Get a human-readable name for an ICAO tag
pub fn get_tag_name(tag: &[u8]) -> &'static str {
    match tag {
        [0x60] => "EF.COM Template",
        [0x61] => "DG1 Template (MRZ)",
        [0x75] => "DG2 Template (Biometric)",
        [0x6B] => "DG11 Template (Additional Personal Details)",
        [0x77] => "EF.SOD Template",
        [0x5C] => "Data Group Tag List",
        [0x5F, 0x01] => "LDS Version Number",
        [0x5F, 0x0E] => "Full Name of Holder",
        [0x5F, 0x0F] => "Name of Other Person (Mother)",
        [0x5F, 0x10] => "Personal Number",
        [0x5F, 0x11] => "Place of Birth / Address",
        [0x5F, 0x1F] => "MRZ Data",
        [0x5F, 0x2E] => "Biometric Data Block",
        [0x5F, 0x36] => "Unicode Version Number",
        [0x7F, 0x60] => "Biometric Information Template",
        [0x7F, 0x61] => "Biometric Information Group Template",
        [0x87] => "Format Owner",
        [0x88] => "Format Type",
        [0xA0] => "Gender Template",
        _ => "Unknown Tag",
    }
}
