//! Origin markers.
//!
//! Every transactional row in the cloud store carries a one-character tag
//! naming the side that authored it. It is the only thing that decides which
//! rows a forward sync may overwrite or delete.

use crate::value::Value;

/// Who authored a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OriginMarker {
    /// Written by the origin store (`"D"`).
    Origin,
    /// Written on the cloud side by the mobile client (`"M"`).
    Cloud,
}

impl OriginMarker {
    /// Stored form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            OriginMarker::Origin => "D",
            OriginMarker::Cloud => "M",
        }
    }

    /// The marker as a column value.
    pub fn value(&self) -> Value {
        Value::Text(self.as_str().to_string())
    }

    /// Parses a stored marker.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value.as_text().map(str::trim) {
            Some("D") => Some(OriginMarker::Origin),
            Some("M") => Some(OriginMarker::Cloud),
            _ => None,
        }
    }

    /// True if a forward sync may overwrite or delete a row carrying `value`.
    ///
    /// NULL and absent markers count as origin-authored.
    pub fn is_origin_owned(value: Option<&Value>) -> bool {
        match value {
            None | Some(Value::Null) => true,
            Some(v) => OriginMarker::from_value(v) == Some(OriginMarker::Origin),
        }
    }
}
