//! Bridge state propagation.
//!
//! Runs after the transferred token has been updated and its lock released.
//! Takes at most one token lock of its own.

use std::sync::Arc;

use tracing::debug;

use chainmirror_core::{Address, EntityLocks, MarketStore, MirrorError, TokenKey, TokenStandard, TransferEvent};

pub struct BridgeTracker {
    store: Arc<dyn MarketStore>,
    locks: Arc<EntityLocks>,
    boundary: Option<Address>,
}

impl BridgeTracker {
    pub fn new(store: Arc<dyn MarketStore>, locks: Arc<EntityLocks>, boundary: Option<Address>) -> Self {
        Self {
            store,
            locks,
            boundary,
        }
    }

    pub fn is_boundary(&self, address: Address) -> bool {
        self.boundary == Some(address)
    }

    /// Only ERC-721 tokens are tracked across the bridge.
    pub async fn propagate(&self, event: &TransferEvent) -> Result<(), MirrorError> {
        if event.standard != TokenStandard::Erc721 {
            return Ok(());
        }
        if event.is_mint() || event.is_burn() {
            if let Some(link) = self.store.bridge_link_for(event.contract).await? {
                let origin = TokenKey::new(link.from_contract, event.token_id);
                // Burn on the mirror: withdrawal to `from` pending. Mint: deposit arrived.
                return if event.is_burn() {
                    self.set_pending(origin, Some(event.from), Some(false)).await
                } else {
                    self.set_pending(origin, None, None).await
                };
            }
        }

        if self.boundary.is_some() {
            return if self.is_boundary(event.to) {
                self.set_pending(event.token_key(), Some(event.from), Some(true)).await
            } else {
                self.set_pending(event.token_key(), None, None).await
            };
        }
        Ok(())
    }

    /// `pending_deposit: None` leaves the flag as it is.
    async fn set_pending(
        &self,
        key: TokenKey,
        pending_owner: Option<Address>,
        pending_deposit: Option<bool>,
    ) -> Result<(), MirrorError> {
        let _guard = self.locks.tokens.lock(&key).await;
        let Some(mut token) = self.store.token(&key).await? else {
            debug!(token = %key, "bridge counterpart not mirrored");
            return Ok(());
        };
        let pending_deposit = pending_deposit.unwrap_or(token.pending_deposit);
        if token.pending_owner == pending_owner && token.pending_deposit == pending_deposit {
            return Ok(());
        }
        token.pending_owner = pending_owner;
        token.pending_deposit = pending_deposit;
        self.store.update_token(&token).await?;
        debug!(token = %key, ?pending_owner, pending_deposit, "bridge state updated");
        Ok(())
    }
}
