//! Entity resolution: get-or-create of profiles and tokens.
//!
//! Tokens are created only after the chain confirms they exist. A newly
//! created token is queued for a full order refresh.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use chainmirror_core::{
    Address, MarketStore, MirrorError, Profile, Token, TokenKey, TokenStandard, U256,
};
use chainmirror_evm::ChainReader;

pub struct EntityResolver {
    store: Arc<dyn MarketStore>,
    chain: Arc<dyn ChainReader>,
    refresh_tx: Option<mpsc::UnboundedSender<TokenKey>>,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn MarketStore>, chain: Arc<dyn ChainReader>) -> Self {
        Self {
            store,
            chain,
            refresh_tx: None,
        }
    }

    /// Send keys of newly created tokens to a refresh queue.
    pub fn with_refresh_queue(mut self, tx: mpsc::UnboundedSender<TokenKey>) -> Self {
        self.refresh_tx = Some(tx);
        self
    }

    pub async fn resolve_profile(&self, address: Address) -> Result<Profile, MirrorError> {
        let (profile, created) = self.store.get_or_create_profile(address).await?;
        if created {
            debug!(address = %profile.display_address(), "profile created");
        }
        Ok(profile)
    }

    /// Load a token, creating it from live chain state on first sight.
    pub async fn resolve_token(
        &self,
        key: TokenKey,
        standard: TokenStandard,
    ) -> Result<Token, MirrorError> {
        if let Some(token) = self.store.token(&key).await? {
            return Ok(token);
        }

        let mut token = Token::new(key, standard);
        match standard {
            TokenStandard::Erc721 => {
                let owner = self
                    .chain
                    .owner_of(key.contract, key.token_id)
                    .await?
                    .ok_or_else(|| not_found(&key))?;
                token.owner = Some(owner);
                token.quantity = U256::from(1u64);
            }
            TokenStandard::Erc1155 => {
                if !self.chain.has_uri(key.contract, key.token_id).await? {
                    return Err(not_found(&key));
                }
            }
        }

        let (token, created) = self.store.insert_token(token).await?;
        if created {
            info!(token = %key, %standard, "token created");
            if let Some(tx) = &self.refresh_tx {
                if tx.send(key).is_err() {
                    debug!(token = %key, "refresh queue closed");
                }
            }
        }
        Ok(token)
    }
}

fn not_found(key: &TokenKey) -> MirrorError {
    MirrorError::TokenNotFound {
        contract: key.contract.to_checksum(None),
        token_id: key.token_id.to_string(),
    }
}
