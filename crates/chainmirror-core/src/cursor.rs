//! Stream cursors: the first block each stream has not yet applied.
//!
//! A cursor is loaded when its stream starts (created lazily at the
//! configured start block) and saved only after a whole scan window has been
//! applied. On restart the stream resumes at `next_block`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MirrorError;

/// Persisted position of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Stream identifier (e.g. `"optimism-erc721"`).
    pub stream_id: String,
    /// First block whose events are not yet applied.
    pub next_block: u64,
    /// Unix timestamp of the last save.
    pub updated_at: i64,
}

impl Cursor {
    /// A fresh cursor positioned so the next window starts at `start_block`.
    pub fn starting_at(stream_id: impl Into<String>, start_block: u64) -> Self {
        Self {
            stream_id: stream_id.into(),
            next_block: start_block,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Record that every block up to `block` has been applied.
    pub fn advance(&mut self, block: u64) {
        self.next_block = block.saturating_add(1);
        self.updated_at = chrono::Utc::now().timestamp();
    }

    /// Last fully applied block, `None` while the cursor still sits at block 0.
    pub fn last_block(&self) -> Option<u64> {
        self.next_block.checked_sub(1)
    }
}

/// Persistence for stream cursors.
///
/// Implementations: `MemoryCursorStore` and `SqliteCursorStore` in
/// `chainmirror-storage`.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, stream_id: &str) -> Result<Option<Cursor>, MirrorError>;

    /// Save (upsert) a cursor.
    async fn save(&self, cursor: &Cursor) -> Result<(), MirrorError>;

    /// Forget a stream's position so it restarts from its start block.
    async fn delete(&self, stream_id: &str) -> Result<(), MirrorError>;
}
