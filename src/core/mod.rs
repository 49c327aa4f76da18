pub mod coordinator;
pub mod listing;
pub mod locator;
pub mod transfer;

pub use coordinator::{Coordinator, ExportRequest};
pub use locator::{ArtifactDescriptor, locate_latest};
pub use transfer::{Downloader, TransferOutcome};
