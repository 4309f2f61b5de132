//! Mountfetch Core Library
//!
//! This library provides resumable transfers of large content packages from
//! a remote source to local storage. A remote-filesystem mount is the data
//! source and a local stream copy is the transfer mechanism.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Mount controller, transfer engine and orchestrator
//! - [`queue`] - Transfer item persistence and the change notification hook
//! - [`config`] - Settings store and mirror provider
//! - [`locator`] - Resolution of the external mount utility
//! - [`db`] - Database connection and schema management

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod download;
pub mod locator;
pub mod queue;

// Re-export commonly used types
pub use config::{Settings, SharedSettings};
pub use db::Database;
pub use download::{DownloadError, DownloadOrchestrator, DownloadResult};
pub use queue::{ItemUpdate, Queue, QueueError, TransferItem, TransferStatus};
