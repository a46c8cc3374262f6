//! Property listings.
//!
//! A listed property can be sold exactly once, by its owner.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CommissionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub i64);

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyStatus {
    Listed,
    Sold,
}

impl PropertyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyStatus::Listed => "listed",
            PropertyStatus::Sold => "sold",
        }
    }

    pub fn is_listed(&self) -> bool {
        matches!(self, PropertyStatus::Listed)
    }
}

impl fmt::Display for PropertyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for PropertyStatus {
    type Err = CommissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "listed" => Ok(PropertyStatus::Listed),
            "sold" => Ok(PropertyStatus::Sold),
            other => Err(CommissionError::UnknownVariant {
                kind: "property status",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!("Listed".parse::<PropertyStatus>(), Ok(PropertyStatus::Listed));
        assert_eq!(PropertyStatus::Sold.to_string(), "sold");
        assert!(PropertyStatus::Listed.is_listed());
        assert!(!PropertyStatus::Sold.is_listed());
        assert!("pending".parse::<PropertyStatus>().is_err());
    }

    #[test]
    fn test_id_is_transparent() {
        assert_eq!(serde_json::to_string(&PropertyId(12)).unwrap(), "12");
        assert_eq!(PropertyId(12).to_string(), "12");
    }
}
