use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which half of the flow produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Enter,
    Confirm,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Enter => "enter",
            Step::Confirm => "confirm",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed PIN entry, as written to the attempt log.
///
/// `match` is only present on confirmation records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub pin: String,
    pub step: Step,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<bool>,
}

impl AttemptRecord {
    /// A record stamped with the current time.
    pub fn new(pin: impl Into<String>, step: Step, matched: Option<bool>) -> Self {
        Self {
            pin: pin.into(),
            step,
            created_at: Utc::now(),
            matched,
        }
    }

    pub fn entered(pin: impl Into<String>) -> Self {
        Self::new(pin, Step::Enter, None)
    }

    pub fn confirmed(pin: impl Into<String>, matched: bool) -> Self {
        Self::new(pin, Step::Confirm, Some(matched))
    }
}
