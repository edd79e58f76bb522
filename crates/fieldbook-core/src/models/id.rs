//! Typed document identifiers
//!
//! Every record id is `"<type>:<uuid>"`. The type prefix lets listings use an
//! ordered range scan over `"<type>:"..="<type>:\u{FFFF}"` instead of a
//! secondary index. Uuids are rendered as lowercase hyphenated hex, all of
//! which sorts below the `\u{FFFF}` sentinel.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Upper bound appended to a type prefix to close its key range.
pub const RANGE_SENTINEL: char = '\u{FFFF}';

/// Kind of record stored by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    /// Site task
    Task,
    /// Inspection, progress, or safety report
    Report,
}

impl RecordType {
    /// All record types, in key order.
    pub const ALL: [Self; 2] = [Self::Report, Self::Task];

    /// Name used in the `type` field and as the id prefix
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Report => "report",
        }
    }

    /// First key of this type's namespace (`"task:"`)
    pub fn range_start(self) -> String {
        format!("{}:", self.as_str())
    }

    /// Last key of this type's namespace (`"task:\u{FFFF}"`)
    pub fn range_end(self) -> String {
        format!("{}:{RANGE_SENTINEL}", self.as_str())
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "report" => Ok(Self::Report),
            other => Err(Error::InvalidInput(format!("unknown record type `{other}`"))),
        }
    }
}

/// Generate a fresh `"<type>:<uuid>"` identifier.
pub fn generate_id(record_type: RecordType) -> String {
    format!("{}:{}", record_type.as_str(), Uuid::new_v4().hyphenated())
}

/// A record identifier carrying its type prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordId {
    record_type: RecordType,
    raw: String,
}

impl RecordId {
    /// Create a new unique id for the given type
    #[must_use]
    pub fn new(record_type: RecordType) -> Self {
        Self {
            record_type,
            raw: generate_id(record_type),
        }
    }

    /// Type encoded in the id prefix
    pub const fn record_type(&self) -> RecordType {
        self.record_type
    }

    /// Get the string representation of this ID
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, token) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidInput(format!("record id `{s}` has no type prefix")))?;
        let record_type = prefix.parse()?;
        if Uuid::parse_str(token).is_err() {
            return Err(Error::InvalidInput(format!(
                "record id `{s}` does not end in a uuid"
            )));
        }
        Ok(Self {
            record_type,
            raw: s.to_string(),
        })
    }
}

impl TryFrom<String> for RecordId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_carry_type_prefix() {
        assert!(generate_id(RecordType::Task).starts_with("task:"));
        assert!(generate_id(RecordType::Report).starts_with("report:"));
    }

    #[test]
    fn ten_thousand_ids_are_unique() {
        let ids: HashSet<String> = (0..10_000).map(|_| generate_id(RecordType::Task)).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn generated_ids_fall_inside_their_range() {
        for record_type in RecordType::ALL {
            let start = record_type.range_start();
            let end = record_type.range_end();
            for _ in 0..100 {
                let id = generate_id(record_type);
                // byte order, which is what the store compares
                assert!(id.as_bytes() > start.as_bytes());
                assert!(id.as_bytes() < end.as_bytes());
            }
        }
    }

    #[test]
    fn ranges_do_not_overlap() {
        let task = generate_id(RecordType::Task);
        assert!(task.as_str() > RecordType::Report.range_end().as_str());
    }

    #[test]
    fn parse_round_trips() {
        let id = RecordId::new(RecordType::Report);
        let parsed: RecordId = id.as_str().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.record_type(), RecordType::Report);
    }

    #[test]
    fn parse_rejects_bad_ids() {
        assert!("task".parse::<RecordId>().is_err());
        assert!("note:6c1a2b70-52c4-4a4e-9f37-7b0f0f2e1d11".parse::<RecordId>().is_err());
        assert!("task:not-a-uuid".parse::<RecordId>().is_err());
    }
}
