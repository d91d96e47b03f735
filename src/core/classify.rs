use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    Keep,
    Flag,
    Act,
}

impl Disposition {
    pub const fn as_str(self) -> &'static str {
        match self {
            Disposition::Keep => "KEEP",
            Disposition::Flag => "FLAG",
            Disposition::Act => "ACT",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy verdict for one resource. Exactly one is attached per descriptor
/// per scan pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub disposition: Disposition,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl Classification {
    pub fn keep_default() -> Self {
        Self {
            disposition: Disposition::Keep,
            reason: "no rule matched".to_string(),
            rule_id: None,
        }
    }
}
