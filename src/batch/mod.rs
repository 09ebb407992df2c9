pub mod buffer;
pub mod error;
pub mod writer;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The logical kind of rows a buffer holds. Each kind has its own schema and
/// its own file series on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Locations,
    Sensors,
    Measurements,
}

impl RecordKind {
    pub(crate) fn file_prefix(&self) -> &'static str {
        match self {
            RecordKind::Locations => "locations",
            RecordKind::Sensors => "sensors",
            RecordKind::Measurements => "measurements",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_prefix())
    }
}
