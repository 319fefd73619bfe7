//! Customer record materialized from verified credential fields.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::codes::{EyeColor, Gender};
use crate::error::ParseError;
use crate::payload::{GROUP1_FIELDS, GROUP2_FIELDS};

const ADDRESS_PARTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub jurisdiction: String,
    pub postal_code: String,
}

impl Address {
    /// Parse `line1;line2;city;jurisdiction;postalCode`.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let parts: Vec<&str> = text.split(';').collect();
        if parts.len() != ADDRESS_PARTS {
            return Err(ParseError::FieldCountMismatch {
                group: "address",
                expected: ADDRESS_PARTS,
                found: parts.len(),
            });
        }

        let line2 = match parts[1] {
            "" => None,
            line => Some(line.to_string()),
        };

        Ok(Self {
            line1: parts[0].to_string(),
            line2,
            city: parts[2].to_string(),
            jurisdiction: parts[3].to_string(),
            postal_code: parts[4].to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub family_name: String,
    pub given_names: String,
    pub date_of_birth: NaiveDate,
    pub date_of_issue: NaiveDate,
    pub date_of_expiration: NaiveDate,
    pub issuing_country: String,
    pub issuing_jurisdiction: String,
    pub identifier: String,
    pub class_restrictions: String,
    pub gender: Gender,
    pub height: String,
    pub eye_color: EyeColor,
    pub address: Address,
}

/// Decode a compact `YYYYMMDD` date. Spaces and apostrophes used as visual
/// separators are ignored.
pub fn decode_compact_date(text: &str) -> Result<NaiveDate, ParseError> {
    let digits: String = text.chars().filter(|c| *c != ' ' && *c != '\'').collect();

    if digits.len() != 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::BadDate(text.to_string()));
    }

    let bad_date = || ParseError::BadDate(text.to_string());
    let year: i32 = digits[0..4].parse().map_err(|_| bad_date())?;
    let month: u32 = digits[4..6].parse().map_err(|_| bad_date())?;
    let day: u32 = digits[6..8].parse().map_err(|_| bad_date())?;

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(bad_date)
}

/// Build a customer record from the fields of groups 1 and 2.
pub fn build(group1: &[String], group2: &[String]) -> Result<CustomerRecord, ParseError> {
    if group1.len() != GROUP1_FIELDS {
        return Err(ParseError::FieldCountMismatch {
            group: "group 1",
            expected: GROUP1_FIELDS,
            found: group1.len(),
        });
    }
    if group2.len() != GROUP2_FIELDS {
        return Err(ParseError::FieldCountMismatch {
            group: "group 2",
            expected: GROUP2_FIELDS,
            found: group2.len(),
        });
    }

    Ok(CustomerRecord {
        family_name: group1[0].clone(),
        given_names: group1[1].clone(),
        date_of_birth: decode_compact_date(&group1[2])?,
        date_of_issue: decode_compact_date(&group1[3])?,
        date_of_expiration: decode_compact_date(&group1[4])?,
        issuing_country: group1[5].clone(),
        issuing_jurisdiction: group1[6].clone(),
        identifier: group1[7].clone(),
        class_restrictions: group1[8].clone(),
        gender: Gender::from_code(&group2[0])?,
        height: group2[2].clone(),
        eye_color: EyeColor::from_code(&group2[3])?,
        address: Address::parse(&group2[6])?,
    })
}
