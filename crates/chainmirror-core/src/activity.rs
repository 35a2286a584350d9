//! On-chain activity rows.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::OrderRef;
use crate::types::{Address, TokenKey, B256, U256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActivityId(pub u64);

/// What a transfer means to the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Mint,
    Airdrop,
    Burn,
    Bridge,
    Sale,
    Transfer,
}

impl ActivityKind {
    /// Two-letter code used by marketplace consumers.
    pub fn code(self) -> &'static str {
        match self {
            Self::Mint => "MI",
            Self::Airdrop => "AD",
            Self::Burn => "BU",
            Self::Bridge => "BR",
            Self::Sale => "SA",
            Self::Transfer => "TR",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Natural key of an activity. Two deliveries of the same transfer produce
/// the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityKey {
    pub txn_id: B256,
    pub token: TokenKey,
    pub quantity: U256,
    pub from: Address,
    pub to: Address,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub key: ActivityKey,
    pub kind: ActivityKind,
    pub order: Option<OrderRef>,
}
