use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Value of the incrementing column a table is migrated by.
///
/// Ordering across variants follows declaration order; a single table only
/// ever produces one variant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CursorValue {
    Ordinal(i64),
    Timestamp(NaiveDateTime),
}

impl fmt::Display for CursorValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CursorValue::Ordinal(value) => write!(f, "{}", value),
            CursorValue::Timestamp(value) => write!(f, "{}", value.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}
