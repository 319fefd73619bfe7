//! Parsing of the compact, delimiter-encoded credential payload.

use crate::error::ParseError;

pub const GROUP_DELIMITER: char = '×';
pub const FIELD_DELIMITER: char = '÷';
/// Terminates the payload; not otherwise interpreted.
pub const FINAL_DELIMITER: char = '¶';

pub const PRIMARY_GROUPS: usize = 12;
pub const SECONDARY_GROUPS: usize = 1;
pub const GROUP1_FIELDS: usize = 9;
pub const GROUP2_FIELDS: usize = 7;

const SIGNATURE_GROUP: usize = 10;

/// Barcode symbology reported by the capture layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbology {
    Qr,
    Pdf417,
    Other,
}

/// One decoded barcode frame.
#[derive(Debug, Clone)]
pub struct RawScan {
    pub text: String,
    pub symbology: Symbology,
}

impl RawScan {
    pub fn qr(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            symbology: Symbology::Qr,
        }
    }
}

/// Structurally validated primary credential. Only [`parse`] builds one, so
/// it always holds every group and the exact field counts.
#[derive(Debug, Clone)]
pub struct PrimaryPayload {
    groups: Vec<String>,
    group1_fields: Vec<String>,
    group2_fields: Vec<String>,
    signature: Vec<u8>,
}

impl PrimaryPayload {
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn group1(&self) -> &str {
        self.groups.get(1).map_or("", String::as_str)
    }

    pub fn group2(&self) -> &str {
        self.groups.get(2).map_or("", String::as_str)
    }

    pub fn group1_fields(&self) -> &[String] {
        &self.group1_fields
    }

    pub fn group2_fields(&self) -> &[String] {
        &self.group2_fields
    }

    /// Decoded signature bytes from group 10.
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }
}

#[derive(Debug, Clone)]
pub enum ParsedScan {
    Primary(PrimaryPayload),
    /// Single group; expected to carry the decimal watermark.
    Secondary(String),
    /// Neither a primary nor a secondary payload.
    Inconclusive,
}

/// Split `text` on `delimiter` into at most `max_pieces` pieces, keeping
/// empty pieces between adjacent delimiters.
fn split_preserving(text: &str, delimiter: char, max_pieces: usize) -> Vec<String> {
    text.splitn(max_pieces, delimiter).map(str::to_string).collect()
}

/// Split a group into fields and require an exact field count.
pub fn split_fields(
    group: &str,
    group_name: &'static str,
    expected: usize,
) -> Result<Vec<String>, ParseError> {
    let fields = split_preserving(group, FIELD_DELIMITER, expected + 1);
    if fields.len() != expected {
        return Err(ParseError::FieldCountMismatch {
            group: group_name,
            expected,
            found: fields.len(),
        });
    }
    Ok(fields)
}

/// Decode the hex signature group. Empty, odd-length and non-hex input are
/// all rejected.
pub fn decode_signature(hex_text: &str) -> Result<Vec<u8>, ParseError> {
    if hex_text.is_empty() {
        return Err(ParseError::BadHex("signature is empty".to_string()));
    }
    hex::decode(hex_text).map_err(|e| ParseError::BadHex(e.to_string()))
}

/// Parse scanned text into a primary payload, a secondary watermark, or an
/// inconclusive result.
pub fn parse(text: &str) -> Result<ParsedScan, ParseError> {
    let groups = split_preserving(text, GROUP_DELIMITER, PRIMARY_GROUPS + 1);

    match groups.len() {
        PRIMARY_GROUPS => parse_primary(groups).map(ParsedScan::Primary),
        SECONDARY_GROUPS => Ok(ParsedScan::Secondary(groups[0].clone())),
        _ => Ok(ParsedScan::Inconclusive),
    }
}

fn parse_primary(groups: Vec<String>) -> Result<PrimaryPayload, ParseError> {
    let group1_fields = split_fields(&groups[1], "group 1", GROUP1_FIELDS)?;
    let group2_fields = split_fields(&groups[2], "group 2", GROUP2_FIELDS)?;
    let signature = decode_signature(&groups[SIGNATURE_GROUP])?;

    Ok(PrimaryPayload {
        groups,
        group1_fields,
        group2_fields,
        signature,
    })
}
