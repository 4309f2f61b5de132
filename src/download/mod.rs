//! Mount-backed transfer engine.
//!
//! This module moves a content package from a remote source to local
//! storage by mounting the source with an external utility and stream-copying
//! the mounted tree, resuming from whatever is already on disk.
//!
//! # Features
//!
//! - Mirror first, public endpoint as fallback
//! - Byte-offset resume per file
//! - One-second-window bandwidth throttling
//! - Cooperative cancellation and pause
//! - Disk-space preflight with room for extraction
//!
//! # Components
//!
//! - [`size`] - size parsing/formatting and the free-space probe
//! - [`mount`] - mount controller (start, readiness, teardown)
//! - [`transfer`] - enumeration, resumable copy, progress aggregation
//! - [`registry`] - one active attempt per item key
//! - [`DownloadOrchestrator`] - public operations and status mapping

pub mod constants;
mod error;
pub mod mount;
mod orchestrator;
pub mod registry;
pub mod size;
mod throttle;
pub mod transfer;

pub use error::{DownloadError, FailureKind, truncate_message};
pub use mount::{
    MountHandle, MountOptions, MountRequest, MountSource, Mounter, ProcessHandle, RcloneMounter,
};
pub use orchestrator::{DownloadOrchestrator, DownloadResult};
pub use registry::{ActiveDownloads, Registration};
pub use size::{DiskSpace, SystemDiskSpace, format_bytes, format_eta, format_speed, parse_size};
pub use throttle::Throttle;
pub use transfer::{
    FileDescriptor, ProgressTracker, TransferHooks, TransferOutcome, TransferProgress,
};

// Note: like the queue module, no module-local Result alias.
// Use `Result<T, DownloadError>` explicitly in function signatures.
