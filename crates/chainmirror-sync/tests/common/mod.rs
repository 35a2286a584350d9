//! Shared fixtures for the pipeline integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use alloy_dyn_abi::DynSolValue;
use chrono::{DateTime, Duration, Utc};

use chainmirror_core::{
    Address, BlockRef, Bytes, ContractInfo, MarketStore, NewOrder, Order, OrderKind, TokenKey,
    TokenStandard, TransferEvent, TransferKind, B256, U256,
};
use chainmirror_evm::calldata::{selector, supported_signatures};
use chainmirror_evm::decoder::{ERC721_TRANSFER_TOPIC, ORDER_FULFILLED_TOPIC};
use chainmirror_evm::{RawLog, TransactionInfo};
use chainmirror_storage::InMemoryMarketStore;
use chainmirror_sync::testing::ScriptedChain;
use chainmirror_sync::{ApplyOutcome, EventPipeline, MirrorContext, StreamBuilder, StreamConfig};

pub const CHAIN: &str = "optimism";
pub const NFT: Address = Address::new([0xa7; 20]);
pub const MULTI: Address = Address::new([0x11; 20]);
pub const EXCHANGE: Address = Address::new([0xee; 20]);
pub const WRAPPER: Address = Address::new([0xd0; 20]);
pub const AGGREGATOR: Address = Address::new([0xa9; 20]);
pub const WETH: Address = Address::new([0x42; 20]);
pub const SELLER: Address = Address::new([0x01; 20]);
pub const BUYER: Address = Address::new([0x02; 20]);
pub const OTHER: Address = Address::new([0x03; 20]);

pub fn stream_config() -> StreamConfig {
    StreamBuilder::new("test", CHAIN, "http://127.0.0.1:1")
        .exchange(EXCHANGE)
        .reward_wrapper(WRAPPER)
        .aggregator(AGGREGATOR)
        .tx_retry_delay_ms(5)
        .build_config()
}

pub struct Harness {
    pub store: Arc<InMemoryMarketStore>,
    pub chain: Arc<ScriptedChain>,
    pub ctx: MirrorContext,
    pub pipeline: EventPipeline,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(stream_config()).await
    }

    pub async fn with_config(config: StreamConfig) -> Self {
        let store = Arc::new(InMemoryMarketStore::new());
        for (address, standard) in [(NFT, TokenStandard::Erc721), (MULTI, TokenStandard::Erc1155)] {
            store
                .upsert_contract(ContractInfo {
                    address,
                    chain: CHAIN.into(),
                    standard,
                    approved: true,
                })
                .await
                .unwrap();
        }
        let chain = Arc::new(ScriptedChain::new());
        let ctx = MirrorContext::new(store.clone());
        let pipeline = EventPipeline::new(&ctx, chain.clone(), &config);
        Self {
            store,
            chain,
            ctx,
            pipeline,
        }
    }

    /// A second pipeline over the same store, locks and chain.
    pub fn another_pipeline(&self) -> EventPipeline {
        EventPipeline::new(&self.ctx, self.chain.clone(), &stream_config())
    }

    pub fn add_tx(&self, hash: B256, from: Address, to: Address, input: Bytes) {
        self.chain.add_transaction(TransactionInfo {
            hash,
            from,
            to: Some(to),
            input,
            block_number: None,
            l1_timestamp: None,
        });
    }

    /// Mint ERC-721 `id` to `to` in a transaction sent by `sender`.
    pub async fn mint(&self, id: u64, to: Address, sender: Address, tx: u8) {
        self.chain.set_owner(nft(id), to);
        self.add_tx(tx_hash(tx), sender, NFT, Bytes::new());
        let outcome = self
            .pipeline
            .apply(&transfer721(Address::ZERO, to, id, 1, tx_hash(tx)))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied { activity_created: true });
    }

    pub async fn place(&self, order: NewOrder) -> Order {
        self.store.insert_order(order).await.unwrap().0
    }

    pub async fn order(&self, order: &Order) -> Order {
        self.store.order(order.id).await.unwrap().unwrap()
    }
}

pub fn tx_hash(n: u8) -> B256 {
    B256::repeat_byte(n)
}

pub fn nft(id: u64) -> TokenKey {
    TokenKey::new(NFT, U256::from(id))
}

pub fn transfer721(from: Address, to: Address, id: u64, block: u64, tx: B256) -> TransferEvent {
    TransferEvent {
        kind: TransferKind::Single,
        standard: TokenStandard::Erc721,
        contract: NFT,
        token_id: U256::from(id),
        quantity: U256::from(1u64),
        from,
        to,
        tx_hash: tx,
        block: BlockRef { number: block, log_index: 0, batch_index: 0 },
    }
}

pub fn transfer1155(from: Address, to: Address, id: u64, quantity: u64, block: u64, tx: B256) -> TransferEvent {
    TransferEvent {
        kind: TransferKind::Single,
        standard: TokenStandard::Erc1155,
        contract: MULTI,
        token_id: U256::from(id),
        quantity: U256::from(quantity),
        from,
        to,
        tx_hash: tx,
        block: BlockRef { number: block, log_index: 0, batch_index: 0 },
    }
}

/// An order valid from an hour ago until tomorrow.
pub fn new_order(kind: OrderKind, token: TokenKey, maker: Address, price: u128, sig: u8) -> NewOrder {
    let now = Utc::now();
    NewOrder {
        kind,
        token,
        maker,
        price,
        end_price: None,
        quantity: U256::from(1u64),
        payment_token: (kind == OrderKind::Buy).then_some(WETH),
        start_time: now - Duration::hours(1),
        end_time: now + Duration::days(1),
        signature: Bytes::from(vec![sig; 65]),
        order_hash: Some(B256::repeat_byte(sig)),
    }
}

pub fn dutch_order(token: TokenKey, maker: Address, start: u128, end: u128, from: DateTime<Utc>, secs: i64, sig: u8) -> NewOrder {
    NewOrder {
        end_price: Some(end),
        start_time: from,
        end_time: from + Duration::seconds(secs),
        ..new_order(OrderKind::DutchAuction, token, maker, start, sig)
    }
}

// ─── Calldata and logs ───────────────────────────────────────────────────────

fn uint(n: u64, bits: usize) -> DynSolValue {
    DynSolValue::Uint(U256::from(n), bits)
}

fn order_parameters() -> DynSolValue {
    DynSolValue::Tuple(vec![
        DynSolValue::Address(SELLER),
        DynSolValue::Address(Address::ZERO),
        DynSolValue::Array(vec![DynSolValue::Tuple(vec![
            uint(2, 8),
            DynSolValue::Address(NFT),
            uint(1, 256),
            uint(1, 256),
            uint(1, 256),
        ])]),
        DynSolValue::Array(vec![]),
        uint(0, 8),
        uint(0, 256),
        uint(u32::MAX as u64, 256),
        DynSolValue::FixedBytes(B256::ZERO, 32),
        uint(1, 256),
        DynSolValue::FixedBytes(B256::ZERO, 32),
        uint(1, 256),
    ])
}

/// `fulfillOrder(Order, bytes32)` calldata carrying `signature`.
pub fn fulfill_order_calldata(signature: &[u8]) -> Bytes {
    let function = supported_signatures()
        .into_iter()
        .find(|s| s.starts_with("fulfillOrder(") && s.ends_with(",bytes32)"))
        .unwrap();
    let order = DynSolValue::Tuple(vec![order_parameters(), DynSolValue::Bytes(signature.to_vec())]);
    let mut data = selector(function).to_vec();
    data.extend(DynSolValue::Tuple(vec![order, DynSolValue::FixedBytes(B256::ZERO, 32)]).abi_encode_params());
    Bytes::from(data)
}

fn word(address: Address) -> String {
    format!("{:#x}", address.into_word())
}

pub fn erc721_log(contract: Address, from: Address, to: Address, id: u64, block: u64, tx: B256) -> RawLog {
    RawLog {
        address: format!("{contract:#x}"),
        topics: vec![
            format!("{ERC721_TRANSFER_TOPIC:#x}"),
            word(from),
            word(to),
            format!("{:#x}", B256::from(U256::from(id).to_be_bytes::<32>())),
        ],
        data: "0x".into(),
        block_number: Some(format!("0x{block:x}")),
        tx_hash: Some(format!("{tx:#x}")),
        log_index: Some("0x0".into()),
        removed: false,
    }
}

pub fn order_fulfilled_log(order_hash: B256, tx: B256) -> RawLog {
    RawLog {
        address: format!("{EXCHANGE:#x}"),
        topics: vec![format!("{ORDER_FULFILLED_TOPIC:#x}"), word(SELLER), word(Address::ZERO)],
        data: format!("0x{}{}", hex_encode(order_hash.as_slice()), "00".repeat(32)),
        block_number: Some("0x1".into()),
        tx_hash: Some(format!("{tx:#x}")),
        log_index: Some("0x1".into()),
        removed: false,
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
