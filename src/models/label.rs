use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Binary annotation assigned to a job posting.
///
/// Stored in the label column as `0` (non-AI) or `1` (AI).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    #[strum(serialize = "Non-AI Job")]
    NonAi,
    #[strum(serialize = "AI Job")]
    Ai,
}

impl Label {
    /// Numeric value written to the label column.
    pub fn as_u8(self) -> u8 {
        match self {
            Label::NonAi => 0,
            Label::Ai => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Label::NonAi),
            1 => Some(Label::Ai),
            _ => None,
        }
    }

    /// Parse a label cell. `Ok(None)` means the cell is unset.
    ///
    /// Dataframe tools round-trip a nullable integer column as floats, so
    /// `0.0` and `1.0` are accepted alongside `0` and `1`.
    pub fn parse_cell(cell: &str) -> Result<Option<Self>, String> {
        match cell.trim() {
            "" => Ok(None),
            "0" | "0.0" => Ok(Some(Label::NonAi)),
            "1" | "1.0" => Ok(Some(Label::Ai)),
            other => Err(format!("invalid label value {other:?}, expected 0, 1 or empty")),
        }
    }
}

impl From<bool> for Label {
    fn from(is_ai: bool) -> Self {
        if is_ai {
            Label::Ai
        } else {
            Label::NonAi
        }
    }
}

impl From<Label> for bool {
    fn from(label: Label) -> Self {
        label == Label::Ai
    }
}
