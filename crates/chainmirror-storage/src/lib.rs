//! chainmirror-storage — persistence backends for ChainMirror.
//!
//! | Backend | Feature | Provides |
//! |---------|---------|----------|
//! | [`memory`] | `memory` (default) | `MarketStore` + `CursorStore` |
//! | `sqlite` | `sqlite` | `CursorStore` |

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::{InMemoryMarketStore, MemoryCursorStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCursorStore;
