//! Live chain reads used by the resolver, matcher and reconciler.
//!
//! [`ChainReader`] is the seam; [`RpcChainReader`] implements it over any
//! [`RpcTransport`] with plain `eth_call`s encoded through `alloy-dyn-abi`.

use std::str::FromStr;
use std::sync::Arc;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use async_trait::async_trait;
use chainmirror_core::{Address, Bytes, MirrorError, TokenKey, TokenStandard, B256, U256};
use chainmirror_rpc::{RpcTransport, RpcTransportExt, TransportError};
use serde_json::{json, Value};

use crate::calldata::selector;
use crate::log::{decode_hex, parse_hex_u64, RawLog};

/// The fields of a transaction the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub hash: B256,
    pub from: Address,
    pub to: Option<Address>,
    pub input: Bytes,
    pub block_number: Option<u64>,
    /// L1 timestamp reported by rollup nodes, in unix seconds.
    pub l1_timestamp: Option<i64>,
}

/// Exchange-side view of an order (`getOrderStatus`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnchainOrderStatus {
    pub validated: bool,
    pub cancelled: bool,
    pub total_filled: U256,
    pub total_size: U256,
}

impl OnchainOrderStatus {
    /// Neither cancelled nor completely filled.
    pub fn is_live(&self) -> bool {
        let fully_filled = self.total_filled > U256::ZERO && self.total_filled == self.total_size;
        !self.cancelled && !fully_filled
    }
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn block_number(&self) -> Result<u64, MirrorError>;

    /// `None` while the node has not seen the transaction yet.
    async fn transaction(&self, hash: B256) -> Result<Option<TransactionInfo>, MirrorError>;

    async fn receipt_logs(&self, hash: B256) -> Result<Vec<RawLog>, MirrorError>;

    async fn block_timestamp(&self, number: u64) -> Result<Option<i64>, MirrorError>;

    /// ERC-721 `ownerOf`; `None` when the call reverts (burned or never minted).
    async fn owner_of(&self, contract: Address, token_id: U256) -> Result<Option<Address>, MirrorError>;

    /// ERC-1155 `uri(id)` is non-empty.
    async fn has_uri(&self, contract: Address, token_id: U256) -> Result<bool, MirrorError>;

    /// ERC-1155 `balanceOf(owner, id)`.
    async fn balance_of(&self, contract: Address, owner: Address, token_id: U256)
        -> Result<U256, MirrorError>;

    async fn is_approved_for_all(
        &self,
        contract: Address,
        owner: Address,
        operator: Address,
    ) -> Result<bool, MirrorError>;

    async fn erc20_allowance(&self, token: Address, owner: Address, spender: Address)
        -> Result<U256, MirrorError>;

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256, MirrorError>;

    /// `None` when the exchange cannot answer for this hash.
    async fn order_status(&self, exchange: Address, order_hash: B256)
        -> Result<Option<OnchainOrderStatus>, MirrorError>;

    /// Whether the token currently exists on chain.
    async fn token_exists(&self, key: &TokenKey, standard: TokenStandard) -> Result<bool, MirrorError> {
        match standard {
            TokenStandard::Erc721 => Ok(self.owner_of(key.contract, key.token_id).await?.is_some()),
            TokenStandard::Erc1155 => self.has_uri(key.contract, key.token_id).await,
        }
    }
}

/// [`ChainReader`] over JSON-RPC.
pub struct RpcChainReader {
    transport: Arc<dyn RpcTransport>,
}

impl RpcChainReader {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    /// `eth_call` at the latest block. `Ok(None)` on revert.
    async fn call(
        &self,
        to: Address,
        signature: &str,
        args: Vec<DynSolValue>,
    ) -> Result<Option<Vec<u8>>, MirrorError> {
        let mut data = selector(signature).to_vec();
        data.extend(DynSolValue::Tuple(args).abi_encode_params());
        let params = vec![
            json!({ "to": format!("{to:#x}"), "data": format!("0x{}", hex::encode(data)) }),
            json!("latest"),
        ];
        match self.transport.request::<String>("eth_call", params).await {
            Ok(out) => Ok(Some(decode_hex(&out, "eth_call result")?)),
            Err(TransportError::Rpc(e)) if e.is_revert() => Ok(None),
            Err(e) => Err(MirrorError::Rpc(e.to_string())),
        }
    }

    async fn call_returning(
        &self,
        to: Address,
        signature: &str,
        args: Vec<DynSolValue>,
        returns: &str,
    ) -> Result<Option<Vec<DynSolValue>>, MirrorError> {
        let Some(out) = self.call(to, signature, args).await? else {
            return Ok(None);
        };
        if out.is_empty() {
            return Ok(None);
        }
        let ty = DynSolType::parse(returns).map_err(|e| MirrorError::Decode(e.to_string()))?;
        let value = ty
            .abi_decode_params(&out)
            .map_err(|e| MirrorError::Decode(format!("{signature}: {e}")))?;
        Ok(value.as_tuple().map(|v| v.to_vec()))
    }

    async fn call_uint(&self, to: Address, signature: &str, args: Vec<DynSolValue>) -> Result<U256, MirrorError> {
        let out = self.call_returning(to, signature, args, "(uint256)").await?;
        Ok(out
            .and_then(|v| v.first().and_then(|x| x.as_uint()).map(|(n, _)| n))
            .unwrap_or(U256::ZERO))
    }
}

fn address_field(v: &Value, field: &str) -> Result<Option<Address>, MirrorError> {
    match v.get(field).and_then(Value::as_str) {
        Some(s) => Address::from_str(s)
            .map(Some)
            .map_err(|e| MirrorError::Decode(format!("{field}: {e}"))),
        None => Ok(None),
    }
}

fn quantity_field(v: &Value, field: &str) -> Option<u64> {
    v.get(field).and_then(Value::as_str).and_then(parse_hex_u64)
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn block_number(&self) -> Result<u64, MirrorError> {
        let hex: String = self
            .transport
            .request("eth_blockNumber", vec![])
            .await
            .map_err(|e| MirrorError::Rpc(e.to_string()))?;
        parse_hex_u64(&hex).ok_or_else(|| MirrorError::Decode(format!("bad block number {hex}")))
    }

    async fn transaction(&self, hash: B256) -> Result<Option<TransactionInfo>, MirrorError> {
        let v: Value = self
            .transport
            .request("eth_getTransactionByHash", vec![json!(format!("{hash:#x}"))])
            .await
            .map_err(|e| MirrorError::Rpc(e.to_string()))?;
        if v.is_null() {
            return Ok(None);
        }
        let from = address_field(&v, "from")?
            .ok_or_else(|| MirrorError::Decode("transaction without sender".into()))?;
        let input = v
            .get("input")
            .and_then(Value::as_str)
            .map(|s| decode_hex(s, "input"))
            .transpose()?
            .unwrap_or_default();
        Ok(Some(TransactionInfo {
            hash,
            from,
            to: address_field(&v, "to")?,
            input: Bytes::from(input),
            block_number: quantity_field(&v, "blockNumber"),
            l1_timestamp: quantity_field(&v, "l1Timestamp").map(|t| t as i64),
        }))
    }

    async fn receipt_logs(&self, hash: B256) -> Result<Vec<RawLog>, MirrorError> {
        let v: Value = self
            .transport
            .request("eth_getTransactionReceipt", vec![json!(format!("{hash:#x}"))])
            .await
            .map_err(|e| MirrorError::Rpc(e.to_string()))?;
        match v.get("logs") {
            Some(logs) => serde_json::from_value(logs.clone())
                .map_err(|e| MirrorError::Decode(format!("receipt logs: {e}"))),
            None => Ok(vec![]),
        }
    }

    async fn block_timestamp(&self, number: u64) -> Result<Option<i64>, MirrorError> {
        let v: Value = self
            .transport
            .request("eth_getBlockByNumber", vec![json!(format!("0x{number:x}")), json!(false)])
            .await
            .map_err(|e| MirrorError::Rpc(e.to_string()))?;
        Ok(quantity_field(&v, "timestamp").map(|t| t as i64))
    }

    async fn owner_of(&self, contract: Address, token_id: U256) -> Result<Option<Address>, MirrorError> {
        let out = self
            .call_returning(
                contract,
                "ownerOf(uint256)",
                vec![DynSolValue::Uint(token_id, 256)],
                "(address)",
            )
            .await?;
        Ok(out
            .and_then(|v| v.first().and_then(DynSolValue::as_address))
            .filter(|a| *a != Address::ZERO))
    }

    async fn has_uri(&self, contract: Address, token_id: U256) -> Result<bool, MirrorError> {
        let out = self
            .call_returning(contract, "uri(uint256)", vec![DynSolValue::Uint(token_id, 256)], "(string)")
            .await?;
        Ok(out
            .and_then(|v| v.first().and_then(|s| s.as_str().map(|s| !s.is_empty())))
            .unwrap_or(false))
    }

    async fn balance_of(&self, contract: Address, owner: Address, token_id: U256) -> Result<U256, MirrorError> {
        self.call_uint(
            contract,
            "balanceOf(address,uint256)",
            vec![DynSolValue::Address(owner), DynSolValue::Uint(token_id, 256)],
        )
        .await
    }

    async fn is_approved_for_all(
        &self,
        contract: Address,
        owner: Address,
        operator: Address,
    ) -> Result<bool, MirrorError> {
        let out = self
            .call_returning(
                contract,
                "isApprovedForAll(address,address)",
                vec![DynSolValue::Address(owner), DynSolValue::Address(operator)],
                "(bool)",
            )
            .await?;
        Ok(out.and_then(|v| v.first().and_then(DynSolValue::as_bool)).unwrap_or(false))
    }

    async fn erc20_allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, MirrorError> {
        self.call_uint(
            token,
            "allowance(address,address)",
            vec![DynSolValue::Address(owner), DynSolValue::Address(spender)],
        )
        .await
    }

    async fn erc20_balance(&self, token: Address, owner: Address) -> Result<U256, MirrorError> {
        self.call_uint(token, "balanceOf(address)", vec![DynSolValue::Address(owner)])
            .await
    }

    async fn order_status(
        &self,
        exchange: Address,
        order_hash: B256,
    ) -> Result<Option<OnchainOrderStatus>, MirrorError> {
        let out = self
            .call_returning(
                exchange,
                "getOrderStatus(bytes32)",
                vec![DynSolValue::FixedBytes(order_hash, 32)],
                "(bool,bool,uint256,uint256)",
            )
            .await?;
        let Some(fields) = out else {
            return Ok(None);
        };
        let flag = |i: usize| fields.get(i).and_then(DynSolValue::as_bool).unwrap_or(false);
        let num = |i: usize| {
            fields
                .get(i)
                .and_then(DynSolValue::as_uint)
                .map(|(n, _)| n)
                .unwrap_or(U256::ZERO)
        };
        Ok(Some(OnchainOrderStatus {
            validated: flag(0),
            cancelled: flag(1),
            total_filled: num(2),
            total_size: num(3),
        }))
    }
}
