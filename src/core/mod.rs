mod action;
mod classify;
mod report;
mod resource;

pub use action::{Action, ActionResult};
pub use classify::{Classification, Disposition};
pub use report::{ReportSummary, ScanRecord, ScanReport};
pub use resource::{ResourceDescriptor, ResourceKind, ResourceStatus};
