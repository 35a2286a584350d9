//! Range-bounded log scanning with adaptive narrowing.
//!
//! For each window the contract addresses are split into shards of at most
//! [`MAX_ADDRESSES_PER_FILTER`]. Each shard runs `eth_newFilter` +
//! `eth_getFilterLogs` over the window. When the provider rejects the range
//! as too large, the [`RangeHint`] reads the narrower end block it suggests,
//! the request is repeated up to that block, and scanning resumes right after
//! it until the window's end is reached.
//!
//! Narrowing is a bounded loop: a hint that does not shrink the range stops
//! the shard, and so does exceeding `max_narrowing_steps`. Either way the
//! outcome reports the first block that was not covered, so the cursor never
//! moves past a hole.

use std::sync::Arc;

use chainmirror_core::{Address, MirrorError, B256};
use chainmirror_rpc::{RangeHint, RpcTransport, RpcTransportExt, TransportError};
use serde_json::{json, Value};

use crate::log::RawLog;

/// Providers cap the address list of a single filter.
pub const MAX_ADDRESSES_PER_FILTER: usize = 5000;

/// Default cap on requests per shard within one scan.
pub const DEFAULT_MAX_NARROWING_STEPS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub from_block: u64,
    pub to_block: u64,
    /// Emitting contracts; empty means any address.
    pub addresses: Vec<Address>,
    /// Accepted topic0 values.
    pub topics: Vec<B256>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Logs of every shard, each shard ascending by `(block, log_index)`,
    /// concatenated in shard order.
    pub logs: Vec<RawLog>,
    /// First block not covered by every shard. `to_block + 1` when complete.
    pub next_from: u64,
}

struct ShardScan {
    logs: Vec<RawLog>,
    next_from: u64,
}

pub struct LogScanner {
    transport: Arc<dyn RpcTransport>,
    hint: Box<dyn RangeHint>,
    max_narrowing_steps: u32,
}

impl LogScanner {
    pub fn new(transport: Arc<dyn RpcTransport>, hint: Box<dyn RangeHint>) -> Self {
        Self {
            transport,
            hint,
            max_narrowing_steps: DEFAULT_MAX_NARROWING_STEPS,
        }
    }

    pub fn with_max_narrowing_steps(mut self, steps: u32) -> Self {
        self.max_narrowing_steps = steps.max(1);
        self
    }

    /// Current chain head.
    pub async fn head(&self) -> Result<u64, MirrorError> {
        let hex: String = self
            .transport
            .request("eth_blockNumber", vec![])
            .await
            .map_err(|e| MirrorError::Rpc(e.to_string()))?;
        crate::log::parse_hex_u64(&hex)
            .ok_or_else(|| MirrorError::Decode(format!("bad block number {hex}")))
    }

    pub async fn scan(&self, req: &ScanRequest) -> Result<ScanOutcome, MirrorError> {
        if req.from_block > req.to_block {
            return Ok(ScanOutcome {
                logs: vec![],
                next_from: req.from_block,
            });
        }

        let shards: Vec<&[Address]> = if req.addresses.is_empty() {
            vec![&req.addresses[..]]
        } else {
            req.addresses.chunks(MAX_ADDRESSES_PER_FILTER).collect()
        };

        let mut outcome = ScanOutcome {
            logs: Vec::new(),
            next_from: req.to_block + 1,
        };
        for (index, shard) in shards.iter().enumerate() {
            let scanned = self
                .scan_shard(req.from_block, req.to_block, shard, &req.topics)
                .await?;
            tracing::debug!(
                shard = index,
                addresses = shard.len(),
                logs = scanned.logs.len(),
                next_from = scanned.next_from,
                "shard scanned"
            );
            outcome.next_from = outcome.next_from.min(scanned.next_from);
            outcome.logs.extend(scanned.logs);
        }
        Ok(outcome)
    }

    async fn scan_shard(
        &self,
        from: u64,
        to: u64,
        shard: &[Address],
        topics: &[B256],
    ) -> Result<ShardScan, MirrorError> {
        let mut logs: Vec<RawLog> = Vec::new();
        let mut start = from;
        let mut end = to;
        let mut steps = 0u32;

        let stopped_at = loop {
            if start > to {
                break None;
            }
            if steps >= self.max_narrowing_steps {
                tracing::warn!(start, end, to, steps, "narrowing step limit reached");
                break Some(start);
            }
            steps += 1;

            match self.fetch(start, end, shard, topics).await {
                Ok(batch) => {
                    logs.extend(batch.into_iter().filter(|l| !l.removed));
                    if end >= to {
                        break None;
                    }
                    start = end + 1;
                    end = to;
                }
                Err(TransportError::Rpc(err)) => match self.hint.suggested_end(&err) {
                    Some(suggested) if suggested > start && suggested < end => {
                        tracing::debug!(start, end, suggested, "range too large, narrowing");
                        end = suggested;
                    }
                    Some(suggested) => {
                        tracing::warn!(start, end, suggested, "range hint does not narrow the request");
                        break Some(start);
                    }
                    None => return Err(MirrorError::Rpc(err.to_string())),
                },
                Err(e) => return Err(MirrorError::Rpc(e.to_string())),
            }
        };

        logs.sort_by_key(RawLog::position);
        Ok(ShardScan {
            logs,
            next_from: stopped_at.unwrap_or(to + 1),
        })
    }

    async fn fetch(
        &self,
        from: u64,
        to: u64,
        shard: &[Address],
        topics: &[B256],
    ) -> Result<Vec<RawLog>, TransportError> {
        let mut filter = json!({
            "fromBlock": format!("0x{from:x}"),
            "toBlock": format!("0x{to:x}"),
            "topics": [topics.iter().map(|t| format!("{t:#x}")).collect::<Vec<_>>()],
        });
        if !shard.is_empty() {
            filter["address"] = Value::from(
                shard.iter().map(|a| format!("{a:#x}")).collect::<Vec<_>>(),
            );
        }
        let filter_id: String = self.transport.request("eth_newFilter", vec![filter]).await?;
        self.transport
            .request("eth_getFilterLogs", vec![json!(filter_id)])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chainmirror_rpc::{AlchemyRangeHint, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Node that rejects ranges wider than `max_width` with an Alchemy-style
    /// hint, and returns one log per block that has one.
    struct WidthLimitedNode {
        max_width: u64,
        /// Overrides the hint: always suggest this end block.
        fixed_hint: Option<u64>,
        log_blocks: Vec<u64>,
        filters: Mutex<HashMap<String, (u64, u64, usize)>>,
        filter_calls: Mutex<Vec<(u64, u64, usize)>>,
    }

    impl WidthLimitedNode {
        fn new(max_width: u64, log_blocks: Vec<u64>) -> Self {
            Self {
                max_width,
                fixed_hint: None,
                log_blocks,
                filters: Mutex::new(HashMap::new()),
                filter_calls: Mutex::new(vec![]),
            }
        }
    }

    fn hex_u64(v: &Value) -> u64 {
        u64::from_str_radix(v.as_str().unwrap().trim_start_matches("0x"), 16).unwrap()
    }

    #[async_trait]
    impl RpcTransport for WidthLimitedNode {
        async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
            match req.method.as_str() {
                "eth_newFilter" => {
                    let f = &req.params[0];
                    let (from, to) = (hex_u64(&f["fromBlock"]), hex_u64(&f["toBlock"]));
                    let addrs = f.get("address").and_then(|a| a.as_array()).map_or(0, |a| a.len());
                    self.filter_calls.lock().unwrap().push((from, to, addrs));
                    let id = format!("0x{:x}", req.id);
                    self.filters.lock().unwrap().insert(id.clone(), (from, to, addrs));
                    Ok(JsonRpcResponse::success(req.id, json!(id)))
                }
                "eth_getFilterLogs" => {
                    let id = req.params[0].as_str().unwrap().to_string();
                    let (from, to, _) = self.filters.lock().unwrap()[&id];
                    if to - from + 1 > self.max_width {
                        let end = self.fixed_hint.unwrap_or(from + self.max_width - 1);
                        let msg = format!(
                            "Log response size exceeded. this block range should work: [0x{from:x}, 0x{end:x}]"
                        );
                        return Ok(JsonRpcResponse::failure(req.id, JsonRpcError::new(-32602, msg)));
                    }
                    let logs: Vec<Value> = self
                        .log_blocks
                        .iter()
                        .filter(|b| **b >= from && **b <= to)
                        .rev()
                        .map(|b| {
                            json!({
                                "address": "0x1111111111111111111111111111111111111111",
                                "topics": [],
                                "data": "0x",
                                "blockNumber": format!("0x{b:x}"),
                                "transactionHash": format!("{:#x}", B256::repeat_byte(1)),
                                "logIndex": "0x0",
                            })
                        })
                        .collect();
                    Ok(JsonRpcResponse::success(req.id, json!(logs)))
                }
                "eth_blockNumber" => Ok(JsonRpcResponse::success(req.id, json!("0x3e8"))),
                other => Ok(JsonRpcResponse::failure(
                    req.id,
                    JsonRpcError::new(-32601, format!("method {other} not found")),
                )),
            }
        }

        fn url(&self) -> &str {
            "test://width-limited"
        }
    }

    fn scanner(node: Arc<WidthLimitedNode>) -> LogScanner {
        LogScanner::new(node, Box::new(AlchemyRangeHint))
    }

    fn request(from: u64, to: u64, addresses: Vec<Address>) -> ScanRequest {
        ScanRequest {
            from_block: from,
            to_block: to,
            addresses,
            topics: vec![crate::decoder::ERC721_TRANSFER_TOPIC],
        }
    }

    #[tokio::test]
    async fn narrows_and_covers_whole_window() {
        let node = Arc::new(WidthLimitedNode::new(10, vec![1, 5, 12, 25, 40]));
        let out = scanner(node.clone()).scan(&request(1, 40, vec![])).await.unwrap();

        assert_eq!(out.next_from, 41);
        let blocks: Vec<u64> = out.logs.iter().map(|l| l.block_number_u64()).collect();
        assert_eq!(blocks, vec![1, 5, 12, 25, 40]);

        // Every block requested exactly once by a successful filter.
        let calls = node.filter_calls.lock().unwrap().clone();
        let covered: Vec<(u64, u64)> = calls
            .iter()
            .filter(|(f, t, _)| t - f + 1 <= 10)
            .map(|(f, t, _)| (*f, *t))
            .collect();
        assert_eq!(covered, vec![(1, 10), (11, 20), (21, 30), (31, 40)]);
    }

    #[tokio::test]
    async fn hint_equal_to_start_returns_empty_shard() {
        let mut node = WidthLimitedNode::new(1, vec![7]);
        node.fixed_hint = Some(5);
        let out = scanner(Arc::new(node)).scan(&request(5, 9, vec![])).await.unwrap();
        assert!(out.logs.is_empty());
        assert_eq!(out.next_from, 5);
    }

    #[tokio::test]
    async fn step_limit_reports_partial_progress() {
        let node = Arc::new(WidthLimitedNode::new(10, vec![3, 15, 95]));
        let out = scanner(node)
            .with_max_narrowing_steps(4)
            .scan(&request(1, 100, vec![]))
            .await
            .unwrap();
        // Steps: reject, [1,10], reject, [11,20] → stops at 21.
        assert_eq!(out.next_from, 21);
        let blocks: Vec<u64> = out.logs.iter().map(|l| l.block_number_u64()).collect();
        assert_eq!(blocks, vec![3, 15]);
    }

    #[tokio::test]
    async fn addresses_are_sharded() {
        let node = Arc::new(WidthLimitedNode::new(1_000, vec![2]));
        let addresses: Vec<Address> = (0..12_001u32)
            .map(|i| {
                let mut bytes = [0u8; 20];
                bytes[16..].copy_from_slice(&i.to_be_bytes());
                Address::from(bytes)
            })
            .collect();
        let out = scanner(node.clone()).scan(&request(1, 5, addresses)).await.unwrap();

        let sizes: Vec<usize> = node.filter_calls.lock().unwrap().iter().map(|c| c.2).collect();
        assert_eq!(sizes, vec![5000, 5000, 2001]);
        // The node does not filter by address, so each shard sees the log.
        assert_eq!(out.logs.len(), 3);
        assert_eq!(out.next_from, 6);
    }

    #[tokio::test]
    async fn non_range_errors_propagate() {
        struct Broken;
        #[async_trait]
        impl RpcTransport for Broken {
            async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
                Ok(JsonRpcResponse::failure(req.id, JsonRpcError::new(-32000, "filter not found")))
            }
            fn url(&self) -> &str {
                "test://broken"
            }
        }
        let s = LogScanner::new(Arc::new(Broken), Box::new(AlchemyRangeHint));
        assert!(matches!(s.scan(&request(1, 2, vec![])).await, Err(MirrorError::Rpc(_))));
    }

    #[tokio::test]
    async fn empty_range() {
        let node = Arc::new(WidthLimitedNode::new(10, vec![]));
        let out = scanner(node.clone()).scan(&request(9, 8, vec![])).await.unwrap();
        assert_eq!(out.next_from, 9);
        assert!(node.filter_calls.lock().unwrap().is_empty());
        assert_eq!(scanner(node).head().await.unwrap(), 1000);
    }
}
