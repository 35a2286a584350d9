//! chainmirror-core — domain model and seams for the chain-to-marketplace mirror.
//!
//! # Architecture
//!
//! ```text
//! SyncLoop (per stream) → LogScanner → EventDecoder → EventPipeline
//!                                                        ├── EntityResolver  (tokens, profiles)
//!                                                        ├── OrderMatcher    (settlement → order)
//!                                                        ├── Reconciler      (ownership, orders, derived fields)
//!                                                        ├── ActivityLedger  (idempotent activity rows)
//!                                                        └── BridgeTracker   (pending owners across a bridge)
//! ```
//!
//! This crate holds the types every stage shares, the `MarketStore` and
//! `CursorStore` persistence traits, per-entity locks, the dutch auction price
//! curve and activity classification.

pub mod activity;
pub mod classify;
pub mod cursor;
pub mod error;
pub mod events;
pub mod lock;
pub mod order;
pub mod pricing;
pub mod store;
pub mod types;

pub use activity::{Activity, ActivityId, ActivityKey, ActivityKind};
pub use classify::{classify, ClassificationInput};
pub use cursor::{Cursor, CursorStore};
pub use error::MirrorError;
pub use events::{EventBus, MirrorEvent};
pub use lock::{EntityGuard, EntityLocks, LockManager};
pub use order::{NewOrder, Order, OrderId, OrderKind, OrderRef, OrderStatus};
pub use pricing::dutch_price;
pub use store::MarketStore;
pub use types::{
    Address, BlockRef, BridgeLink, Bytes, ContractInfo, DerivedFields, Profile, Token, TokenKey,
    TokenStandard, TransferEvent, TransferKind, B256, U256,
};
