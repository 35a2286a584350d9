//! Shared domain types: tokens, profiles, transfers, contracts and bridge links.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use alloy_primitives::{Address, Bytes, B256, U256};

use crate::order::OrderRef;

/// Token standard of a mirrored contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStandard {
    /// Single-owner tokens.
    Erc721,
    /// Multi-owner tokens with per-owner quantities.
    Erc1155,
}

impl fmt::Display for TokenStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erc721 => write!(f, "erc721"),
            Self::Erc1155 => write!(f, "erc1155"),
        }
    }
}

/// Natural key of a token: `(contract, token_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenKey {
    pub contract: Address,
    pub token_id: U256,
}

impl TokenKey {
    pub fn new(contract: Address, token_id: U256) -> Self {
        Self { contract, token_id }
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.contract.to_checksum(None), self.token_id)
    }
}

/// Position of a transfer inside the chain.
///
/// Orders first by block, then by log index, then by the item's position
/// inside a batch log, which is the order events are applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub log_index: u32,
    pub batch_index: u32,
}

/// Whether a transfer came from a single-item log or was expanded from a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferKind {
    Single,
    BatchItem,
}

/// Canonical transfer event decoded from a raw log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub kind: TransferKind,
    pub standard: TokenStandard,
    pub contract: Address,
    pub token_id: U256,
    pub quantity: U256,
    pub from: Address,
    pub to: Address,
    pub tx_hash: B256,
    pub block: BlockRef,
}

impl TransferEvent {
    pub fn token_key(&self) -> TokenKey {
        TokenKey::new(self.contract, self.token_id)
    }

    pub fn is_mint(&self) -> bool {
        self.from == Address::ZERO
    }

    pub fn is_burn(&self) -> bool {
        self.to == Address::ZERO
    }
}

/// A wallet known to the marketplace, keyed by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub address: Address,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            created_at: Utc::now(),
        }
    }

    /// EIP-55 checksummed form of the address.
    pub fn display_address(&self) -> String {
        self.address.to_checksum(None)
    }
}

/// A contract registered for mirroring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInfo {
    pub address: Address,
    /// Chain slug the contract lives on (e.g. `"optimism"`).
    pub chain: String,
    pub standard: TokenStandard,
    /// Only approved contracts are scanned and applied.
    pub approved: bool,
}

/// Origin-chain contract paired with its bridged mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeLink {
    /// Contract on the origin chain.
    pub from_contract: Address,
    /// Mirror contract on the destination chain.
    pub to_contract: Address,
}

/// Token fields recomputed from the token's orders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedFields {
    pub for_sale: bool,
    pub price: Option<u128>,
    pub listing: Option<OrderRef>,
    pub highest_offer: Option<u128>,
    pub last_sale_price: Option<u128>,
}

/// Mirrored token state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub key: TokenKey,
    pub standard: TokenStandard,
    /// Current owner for single-owner tokens.
    pub owner: Option<Address>,
    /// Owner recorded while the token is in flight across a bridge.
    pub pending_owner: Option<Address>,
    pub pending_deposit: bool,
    /// Total supply held across owners (1 for a live single-owner token).
    pub quantity: U256,
    pub is_airdrop: bool,
    pub derived: DerivedFields,
}

impl Token {
    pub fn new(key: TokenKey, standard: TokenStandard) -> Self {
        Self {
            key,
            standard,
            owner: None,
            pending_owner: None,
            pending_deposit: false,
            quantity: U256::ZERO,
            is_airdrop: false,
            derived: DerivedFields::default(),
        }
    }
}
