//! SQLite cursor store.
//!
//! Stream cursors are the only state the mirror itself must persist across
//! restarts; marketplace rows live in whatever backs [`MarketStore`].
//!
//! ```rust,no_run
//! use chainmirror_storage::sqlite::SqliteCursorStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cursors = SqliteCursorStore::open("./mirror.db").await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`MarketStore`]: chainmirror_core::MarketStore

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainmirror_core::{Cursor, CursorStore, MirrorError};

/// SQLite-backed [`CursorStore`].
pub struct SqliteCursorStore {
    pool: SqlitePool,
}

impl SqliteCursorStore {
    /// Open (or create) a database at `path`.
    ///
    /// Accepts a plain file path or a full `sqlite:` URL.
    pub async fn open(path: &str) -> Result<Self, MirrorError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| MirrorError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Ephemeral database. A single connection keeps every query on the same
    /// in-memory file.
    pub async fn in_memory() -> Result<Self, MirrorError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| MirrorError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), MirrorError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| MirrorError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cursors (
                stream_id  TEXT    NOT NULL PRIMARY KEY,
                next_block INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MirrorError::Storage(e.to_string()))?;

        Ok(())
    }

    /// All stored cursors, ordered by stream id.
    pub async fn list(&self) -> Result<Vec<Cursor>, MirrorError> {
        let rows = sqlx::query(
            "SELECT stream_id, next_block, updated_at FROM cursors ORDER BY stream_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MirrorError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| Cursor {
                stream_id: r.get("stream_id"),
                next_block: r.get::<i64, _>("next_block") as u64,
                updated_at: r.get("updated_at"),
            })
            .collect())
    }
}

// ─── CursorStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn load(&self, stream_id: &str) -> Result<Option<Cursor>, MirrorError> {
        let row = sqlx::query(
            "SELECT stream_id, next_block, updated_at FROM cursors WHERE stream_id = ?",
        )
        .bind(stream_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MirrorError::Storage(e.to_string()))?;

        Ok(row.map(|r| Cursor {
            stream_id: r.get("stream_id"),
            next_block: r.get::<i64, _>("next_block") as u64,
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save(&self, cursor: &Cursor) -> Result<(), MirrorError> {
        sqlx::query(
            "INSERT OR REPLACE INTO cursors (stream_id, next_block, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(&cursor.stream_id)
        .bind(cursor.next_block as i64)
        .bind(cursor.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| MirrorError::Storage(e.to_string()))?;

        debug!(stream = %cursor.stream_id, next_block = cursor.next_block, "cursor saved");
        Ok(())
    }

    async fn delete(&self, stream_id: &str) -> Result<(), MirrorError> {
        sqlx::query("DELETE FROM cursors WHERE stream_id = ?")
            .bind(stream_id)
            .execute(&self.pool)
            .await
            .map_err(|e| MirrorError::Storage(e.to_string()))?;

        Ok(())
    }
}
