//! chainmirror-evm — EVM-facing pieces of ChainMirror.
//!
//! - [`scanner`]: sharded, self-narrowing `eth_newFilter` log scans
//! - [`decoder`]: transfer logs → [`chainmirror_core::TransferEvent`]s
//! - [`calldata`]: exchange settlement calldata → order signatures
//! - [`reader`]: live chain reads (`ownerOf`, balances, approvals, order status)

pub mod calldata;
pub mod decoder;
pub mod error;
pub mod log;
pub mod reader;
pub mod scanner;

pub use calldata::{decode_exchange_call, ExchangeCall, ExchangeFunction};
pub use decoder::{decode, Decoded, EventSignature, ORDER_FULFILLED_TOPIC};
pub use error::DecodeError;
pub use log::RawLog;
pub use reader::{ChainReader, OnchainOrderStatus, RpcChainReader, TransactionInfo};
pub use scanner::{LogScanner, ScanOutcome, ScanRequest, MAX_ADDRESSES_PER_FILTER};
