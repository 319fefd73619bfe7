//! Fixed code tables used when materializing a customer record.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ParseError;

/// Sex code per ISO/IEC 5218.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    NotKnown,
    Male,
    Female,
    NotApplicable,
}

impl Gender {
    pub fn from_code(code: &str) -> Result<Self, ParseError> {
        match code {
            "0" => Ok(Self::NotKnown),
            "1" => Ok(Self::Male),
            "2" => Ok(Self::Female),
            "9" => Ok(Self::NotApplicable),
            other => Err(ParseError::UnknownCode {
                table: "gender",
                code: other.to_string(),
            }),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::NotKnown => "Not known",
            Self::Male => "Male",
            Self::Female => "Female",
            Self::NotApplicable => "Not applicable",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Eye color per ANSI D20.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EyeColor {
    Black,
    Blue,
    Brown,
    Gray,
    Green,
    Hazel,
    Maroon,
    Pink,
    Dichromatic,
    Unknown,
}

impl EyeColor {
    pub fn from_code(code: &str) -> Result<Self, ParseError> {
        match code {
            "BLK" => Ok(Self::Black),
            "BLU" => Ok(Self::Blue),
            "BRO" => Ok(Self::Brown),
            "GRY" => Ok(Self::Gray),
            "GRN" => Ok(Self::Green),
            "HAZ" => Ok(Self::Hazel),
            "MAR" => Ok(Self::Maroon),
            "PNK" => Ok(Self::Pink),
            "DIC" => Ok(Self::Dichromatic),
            "UNK" => Ok(Self::Unknown),
            other => Err(ParseError::UnknownCode {
                table: "eye color",
                code: other.to_string(),
            }),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Black => "Black",
            Self::Blue => "Blue",
            Self::Brown => "Brown",
            Self::Gray => "Gray",
            Self::Green => "Green",
            Self::Hazel => "Hazel",
            Self::Maroon => "Maroon",
            Self::Pink => "Pink",
            Self::Dichromatic => "Dichromatic",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for EyeColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
