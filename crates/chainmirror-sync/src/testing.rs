//! A scripted, in-memory [`ChainReader`].
//!
//! Chain state is set up explicitly (owners, balances, transactions,
//! receipts) and read back through the same trait the pipeline uses against
//! a live node. Useful for tests and dry runs of a configuration.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use chainmirror_core::{Address, MirrorError, TokenKey, B256, U256};
use chainmirror_evm::{ChainReader, OnchainOrderStatus, RawLog, TransactionInfo};

/// Timestamp of block 0 when none was scripted.
const GENESIS_TIMESTAMP: i64 = 1_700_000_000;

#[derive(Default)]
struct ChainState {
    head: u64,
    owners: HashMap<TokenKey, Address>,
    uris: HashSet<TokenKey>,
    balances: HashMap<(TokenKey, Address), U256>,
    transactions: HashMap<B256, TransactionInfo>,
    /// Remaining lookups that report the transaction as unknown.
    hidden: HashMap<B256, u32>,
    lookups: HashMap<B256, u32>,
    receipts: HashMap<B256, Vec<RawLog>>,
    timestamps: HashMap<u64, i64>,
    approvals: HashMap<(Address, Address, Address), bool>,
    allowances: HashMap<(Address, Address, Address), U256>,
    erc20_balances: HashMap<(Address, Address), U256>,
    order_statuses: HashMap<B256, OnchainOrderStatus>,
    /// Remaining order status reads that fail.
    failing_status_reads: u32,
}

#[derive(Default)]
pub struct ScriptedChain {
    state: Mutex<ChainState>,
}

impl ScriptedChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_head(&self, block: u64) {
        self.state().head = block;
    }

    pub fn set_owner(&self, key: TokenKey, owner: Address) {
        self.state().owners.insert(key, owner);
    }

    pub fn burn(&self, key: TokenKey) {
        self.state().owners.remove(&key);
    }

    /// Give an ERC-1155 id a metadata URI so it counts as existing.
    pub fn set_uri(&self, key: TokenKey) {
        self.state().uris.insert(key);
    }

    pub fn set_balance(&self, key: TokenKey, owner: Address, amount: U256) {
        self.state().balances.insert((key, owner), amount);
    }

    pub fn add_transaction(&self, tx: TransactionInfo) {
        self.state().transactions.insert(tx.hash, tx);
    }

    /// Report `hash` as unknown for the next `lookups` reads.
    pub fn hide_transaction(&self, hash: B256, lookups: u32) {
        self.state().hidden.insert(hash, lookups);
    }

    /// How many times `hash` was looked up.
    pub fn transaction_lookups(&self, hash: B256) -> u32 {
        self.state().lookups.get(&hash).copied().unwrap_or(0)
    }

    pub fn add_receipt_log(&self, hash: B256, log: RawLog) {
        self.state().receipts.entry(hash).or_default().push(log);
    }

    pub fn set_block_timestamp(&self, number: u64, timestamp: i64) {
        self.state().timestamps.insert(number, timestamp);
    }

    pub fn set_approval(&self, contract: Address, owner: Address, operator: Address, approved: bool) {
        self.state().approvals.insert((contract, owner, operator), approved);
    }

    pub fn set_erc20(&self, token: Address, owner: Address, spender: Address, allowance: U256, balance: U256) {
        let mut state = self.state();
        state.allowances.insert((token, owner, spender), allowance);
        state.erc20_balances.insert((token, owner), balance);
    }

    pub fn set_order_status(&self, order_hash: B256, status: OnchainOrderStatus) {
        self.state().order_statuses.insert(order_hash, status);
    }

    /// Fail the next `reads` order status lookups as if the node were down.
    pub fn fail_order_status(&self, reads: u32) {
        self.state().failing_status_reads = reads;
    }
}

#[async_trait]
impl ChainReader for ScriptedChain {
    async fn block_number(&self) -> Result<u64, MirrorError> {
        Ok(self.state().head)
    }

    async fn transaction(&self, hash: B256) -> Result<Option<TransactionInfo>, MirrorError> {
        let mut state = self.state();
        *state.lookups.entry(hash).or_default() += 1;
        if let Some(remaining) = state.hidden.get_mut(&hash) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(None);
            }
        }
        Ok(state.transactions.get(&hash).cloned())
    }

    async fn receipt_logs(&self, hash: B256) -> Result<Vec<RawLog>, MirrorError> {
        Ok(self.state().receipts.get(&hash).cloned().unwrap_or_default())
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<i64>, MirrorError> {
        let state = self.state();
        Ok(Some(
            state
                .timestamps
                .get(&number)
                .copied()
                .unwrap_or(GENESIS_TIMESTAMP + number as i64 * 2),
        ))
    }

    async fn owner_of(&self, contract: Address, token_id: U256) -> Result<Option<Address>, MirrorError> {
        Ok(self.state().owners.get(&TokenKey::new(contract, token_id)).copied())
    }

    async fn has_uri(&self, contract: Address, token_id: U256) -> Result<bool, MirrorError> {
        Ok(self.state().uris.contains(&TokenKey::new(contract, token_id)))
    }

    async fn balance_of(&self, contract: Address, owner: Address, token_id: U256) -> Result<U256, MirrorError> {
        Ok(self
            .state()
            .balances
            .get(&(TokenKey::new(contract, token_id), owner))
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn is_approved_for_all(
        &self,
        contract: Address,
        owner: Address,
        operator: Address,
    ) -> Result<bool, MirrorError> {
        Ok(self
            .state()
            .approvals
            .get(&(contract, owner, operator))
            .copied()
            .unwrap_or(false))
    }

    async fn erc20_allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, MirrorError> {
        Ok(self
            .state()
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256, MirrorError> {
        Ok(self
            .state()
            .erc20_balances
            .get(&(token, owner))
            .copied()
            .unwrap_or(U256::ZERO))
    }

    async fn order_status(
        &self,
        _exchange: Address,
        order_hash: B256,
    ) -> Result<Option<OnchainOrderStatus>, MirrorError> {
        let mut state = self.state();
        if state.failing_status_reads > 0 {
            state.failing_status_reads -= 1;
            return Err(MirrorError::Rpc("order status unavailable".into()));
        }
        Ok(state.order_statuses.get(&order_hash).copied())
    }
}
