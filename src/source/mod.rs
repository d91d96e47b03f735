use std::fmt;

use crate::core::{ResourceDescriptor, ResourceKind};

/// The provider listing failed or denied us. Fatal to the whole pass: a
/// partial listing must never be mistaken for a consistent fleet.
#[derive(Debug)]
pub struct SourceUnavailable {
    pub source: String,
    pub detail: String,
}

impl SourceUnavailable {
    pub fn new(source: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for SourceUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source unavailable: {}: {}", self.source, self.detail)
    }
}

impl std::error::Error for SourceUnavailable {}

/// Read-only enumeration of one resource fleet, pulled page by page so large
/// fleets never need to be fully buffered.
pub trait ResourceSource {
    fn kind(&self) -> ResourceKind;

    /// Human-readable scope of this listing, used as the report header
    /// (e.g. "aws ec2 volumes (region eu-west-1)").
    fn describe(&self) -> String;

    /// Pull the next page of descriptors; `Ok(None)` once the fleet is
    /// drained. Implementations must not mutate remote state.
    fn next_page(&mut self) -> Result<Option<Vec<ResourceDescriptor>>, SourceUnavailable>;
}
