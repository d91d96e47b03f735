use std::fmt;

use serde::{Deserialize, Serialize};

/// Remediation effect a scan pass may apply to ACT-classified resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Delete,
    Stop,
    Rotate,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Delete => "DELETE",
            Action::Stop => "STOP",
            Action::Rotate => "ROTATE",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the single action attempt for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome")]
pub enum ActionResult {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "SKIPPED_DRY_RUN")]
    SkippedDryRun,
    #[serde(rename = "FAILED")]
    Failed { reason: String },
}

impl ActionResult {
    pub fn failed(reason: impl Into<String>) -> Self {
        ActionResult::Failed {
            reason: reason.into(),
        }
    }

    pub const fn is_failed(&self) -> bool {
        matches!(self, ActionResult::Failed { .. })
    }
}
