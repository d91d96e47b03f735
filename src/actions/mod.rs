use anyhow::Result;

use crate::core::{Action, ResourceDescriptor};

/// Applies the remediation effect for ACT-classified resources.
///
/// Implementations perform exactly one provider mutation per call and are
/// shared across the runner's worker pool, so they must be `Send + Sync`.
/// The runner enforces dry-run: in a dry-run pass `apply` is never called.
pub trait ActionExecutor: Send + Sync {
    fn apply(&self, resource: &ResourceDescriptor, action: Action) -> Result<()>;
}
