//! Repository seam for the queue collaborator.
//!
//! The orchestrator never holds authoritative item state: it re-reads through
//! [`QueueRepository::find_item`] before deciding and writes through
//! [`QueueRepository::update_item`].

use async_trait::async_trait;

use super::{ItemUpdate, Queue, Result, TransferItem};

/// Data-access contract between the download core and the item queue.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Reads the current snapshot of an item.
    async fn find_item(&self, key: &str) -> Result<Option<TransferItem>>;

    /// Applies a partial update; returns whether a row changed.
    async fn update_item(&self, key: &str, update: &ItemUpdate) -> Result<bool>;
}

#[async_trait]
impl QueueRepository for Queue {
    async fn find_item(&self, key: &str) -> Result<Option<TransferItem>> {
        Queue::find_item(self, key).await
    }

    async fn update_item(&self, key: &str, update: &ItemUpdate) -> Result<bool> {
        Queue::update_item(self, key, update).await
    }
}
