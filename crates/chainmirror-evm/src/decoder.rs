//! Transfer log decoder.
//!
//! Dispatches on topic0 only:
//!
//! | Event | topics | data |
//! |---|---|---|
//! | ERC-721 `Transfer` | sig, from, to, tokenId | — |
//! | ERC-1155 `TransferSingle` | sig, operator, from, to | id, value |
//! | ERC-1155 `TransferBatch` | sig, operator, from, to | ids[], values[] |
//!
//! ERC-20 `Transfer` shares the ERC-721 signature but carries the amount in
//! data and has three topics; it is reported as unrecognized.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::b256;
use chainmirror_core::{BlockRef, TokenStandard, TransferEvent, TransferKind, B256, U256};

use crate::error::DecodeError;
use crate::log::RawLog;

pub const ERC721_TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");
pub const ERC1155_TRANSFER_SINGLE_TOPIC: B256 =
    b256!("c3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62");
pub const ERC1155_TRANSFER_BATCH_TOPIC: B256 =
    b256!("4a39dc06d4c0dbc64b70af90fd698a233a518aa5d07e595d983b8c0526c8f7fb");
/// Seaport `OrderFulfilled`; the order hash is the first data word.
pub const ORDER_FULFILLED_TOPIC: B256 =
    b256!("9d9af8e38d66c62e2c12f0225249fd9d721c54b83f48d9352c97c6cacdcb6f31");

/// Transfer events the mirror understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSignature {
    Erc721Transfer,
    Erc1155Single,
    Erc1155Batch,
}

impl EventSignature {
    pub fn from_topic(topic0: B256) -> Option<Self> {
        match topic0 {
            t if t == ERC721_TRANSFER_TOPIC => Some(Self::Erc721Transfer),
            t if t == ERC1155_TRANSFER_SINGLE_TOPIC => Some(Self::Erc1155Single),
            t if t == ERC1155_TRANSFER_BATCH_TOPIC => Some(Self::Erc1155Batch),
            _ => None,
        }
    }

    pub fn topic(self) -> B256 {
        match self {
            Self::Erc721Transfer => ERC721_TRANSFER_TOPIC,
            Self::Erc1155Single => ERC1155_TRANSFER_SINGLE_TOPIC,
            Self::Erc1155Batch => ERC1155_TRANSFER_BATCH_TOPIC,
        }
    }

    pub fn standard(self) -> TokenStandard {
        match self {
            Self::Erc721Transfer => TokenStandard::Erc721,
            Self::Erc1155Single | Self::Erc1155Batch => TokenStandard::Erc1155,
        }
    }

    /// Signatures to subscribe to for a standard (`None` = all).
    pub fn for_standard(standard: Option<TokenStandard>) -> Vec<Self> {
        match standard {
            Some(TokenStandard::Erc721) => vec![Self::Erc721Transfer],
            Some(TokenStandard::Erc1155) => vec![Self::Erc1155Single, Self::Erc1155Batch],
            None => vec![Self::Erc721Transfer, Self::Erc1155Single, Self::Erc1155Batch],
        }
    }
}

/// Result of decoding one log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Single(TransferEvent),
    Batch(Vec<TransferEvent>),
}

impl Decoded {
    pub fn into_events(self) -> Vec<TransferEvent> {
        match self {
            Self::Single(ev) => vec![ev],
            Self::Batch(evs) => evs,
        }
    }
}

pub fn decode(log: &RawLog) -> Result<Decoded, DecodeError> {
    let topic0 = log.topic(0)?;
    let signature = EventSignature::from_topic(topic0).ok_or_else(|| {
        DecodeError::UnrecognizedEvent {
            topic0: format!("{topic0:#x}"),
        }
    })?;

    let contract = log.emitter()?;
    let tx_hash = log.transaction_hash()?;
    let (number, log_index) = log.position();
    let block = |batch_index: u32| BlockRef {
        number,
        log_index,
        batch_index,
    };

    match signature {
        EventSignature::Erc721Transfer => {
            if log.topics.len() != 4 {
                return Err(DecodeError::UnrecognizedEvent {
                    topic0: format!("{topic0:#x}"),
                });
            }
            Ok(Decoded::Single(TransferEvent {
                kind: TransferKind::Single,
                standard: TokenStandard::Erc721,
                contract,
                token_id: U256::from_be_bytes(log.topic(3)?.0),
                quantity: U256::from(1u64),
                from: log.topic_address(1)?,
                to: log.topic_address(2)?,
                tx_hash,
                block: block(0),
            }))
        }
        EventSignature::Erc1155Single => {
            let data = log.data_bytes()?;
            if data.len() < 64 {
                return Err(DecodeError::AbiDecodeFailed {
                    reason: format!("TransferSingle data is {} bytes, need 64", data.len()),
                });
            }
            Ok(Decoded::Single(TransferEvent {
                kind: TransferKind::Single,
                standard: TokenStandard::Erc1155,
                contract,
                token_id: U256::from_be_slice(&data[..32]),
                quantity: U256::from_be_slice(&data[32..64]),
                from: log.topic_address(2)?,
                to: log.topic_address(3)?,
                tx_hash,
                block: block(0),
            }))
        }
        EventSignature::Erc1155Batch => {
            let from = log.topic_address(2)?;
            let to = log.topic_address(3)?;
            let (ids, values) = decode_batch_payload(&log.data_bytes()?)?;
            let events = ids
                .into_iter()
                .zip(values)
                .enumerate()
                .map(|(i, (token_id, quantity))| TransferEvent {
                    kind: TransferKind::BatchItem,
                    standard: TokenStandard::Erc1155,
                    contract,
                    token_id,
                    quantity,
                    from,
                    to,
                    tx_hash,
                    block: block(i as u32),
                })
                .collect();
            Ok(Decoded::Batch(events))
        }
    }
}

fn decode_batch_payload(data: &[u8]) -> Result<(Vec<U256>, Vec<U256>), DecodeError> {
    let ty = DynSolType::Tuple(vec![
        DynSolType::Array(Box::new(DynSolType::Uint(256))),
        DynSolType::Array(Box::new(DynSolType::Uint(256))),
    ]);
    let decoded = ty
        .abi_decode_params(data)
        .map_err(|e| DecodeError::AbiDecodeFailed { reason: e.to_string() })?;

    let parts = decoded.as_tuple().unwrap_or_default();
    let ids = uint_array(parts.first())?;
    let values = uint_array(parts.get(1))?;
    if ids.len() != values.len() {
        return Err(DecodeError::BatchLengthMismatch {
            ids: ids.len(),
            values: values.len(),
        });
    }
    Ok((ids, values))
}

fn uint_array(value: Option<&DynSolValue>) -> Result<Vec<U256>, DecodeError> {
    let items = value
        .and_then(|v| v.as_array())
        .ok_or_else(|| DecodeError::AbiDecodeFailed {
            reason: "expected uint256[]".into(),
        })?;
    items
        .iter()
        .map(|v| {
            v.as_uint().map(|(n, _)| n).ok_or_else(|| DecodeError::AbiDecodeFailed {
                reason: "expected uint256".into(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{keccak256, Address};

    fn word(addr: Address) -> String {
        format!("{:#x}", addr.into_word())
    }

    fn log(topics: Vec<String>, data: Vec<u8>) -> RawLog {
        RawLog {
            address: format!("{:#x}", Address::repeat_byte(0xcc)),
            topics,
            data: format!("0x{}", hex::encode(data)),
            block_number: Some("0x64".into()),
            tx_hash: Some(format!("{:#x}", B256::repeat_byte(0xee))),
            log_index: Some("0x2".into()),
            removed: false,
        }
    }

    #[test]
    fn topics_match_signatures() {
        assert_eq!(keccak256("Transfer(address,address,uint256)"), ERC721_TRANSFER_TOPIC);
        assert_eq!(
            keccak256("TransferSingle(address,address,address,uint256,uint256)"),
            ERC1155_TRANSFER_SINGLE_TOPIC
        );
        assert_eq!(
            keccak256("TransferBatch(address,address,address,uint256[],uint256[])"),
            ERC1155_TRANSFER_BATCH_TOPIC
        );
    }

    #[test]
    fn decodes_erc721_transfer() {
        let (from, to) = (Address::repeat_byte(1), Address::repeat_byte(2));
        let raw = log(
            vec![
                format!("{ERC721_TRANSFER_TOPIC:#x}"),
                word(from),
                word(to),
                format!("{:#x}", B256::from(U256::from(77u64))),
            ],
            vec![],
        );
        let ev = match decode(&raw).unwrap() {
            Decoded::Single(ev) => ev,
            other => panic!("expected single, got {other:?}"),
        };
        assert_eq!(ev.standard, TokenStandard::Erc721);
        assert_eq!(ev.token_id, U256::from(77u64));
        assert_eq!((ev.from, ev.to), (from, to));
        assert_eq!(ev.contract, Address::repeat_byte(0xcc));
        assert_eq!(ev.block, BlockRef { number: 100, log_index: 2, batch_index: 0 });
    }

    #[test]
    fn erc20_transfer_is_unrecognized() {
        let raw = log(
            vec![
                format!("{ERC721_TRANSFER_TOPIC:#x}"),
                word(Address::repeat_byte(1)),
                word(Address::repeat_byte(2)),
            ],
            U256::from(5u64).to_be_bytes::<32>().to_vec(),
        );
        assert!(matches!(decode(&raw), Err(DecodeError::UnrecognizedEvent { .. })));
    }

    #[test]
    fn decodes_transfer_single() {
        let mut data = U256::from(9u64).to_be_bytes::<32>().to_vec();
        data.extend(U256::from(4u64).to_be_bytes::<32>());
        let raw = log(
            vec![
                format!("{ERC1155_TRANSFER_SINGLE_TOPIC:#x}"),
                word(Address::repeat_byte(0xaa)),
                word(Address::repeat_byte(1)),
                word(Address::repeat_byte(2)),
            ],
            data,
        );
        let ev = decode(&raw).unwrap().into_events().remove(0);
        assert_eq!(ev.token_id, U256::from(9u64));
        assert_eq!(ev.quantity, U256::from(4u64));
        assert_eq!(ev.from, Address::repeat_byte(1));
        assert_eq!(ev.to, Address::repeat_byte(2));
    }

    #[test]
    fn expands_transfer_batch() {
        let payload = DynSolValue::Tuple(vec![
            DynSolValue::Array(vec![
                DynSolValue::Uint(U256::from(1u64), 256),
                DynSolValue::Uint(U256::from(2u64), 256),
                DynSolValue::Uint(U256::from(3u64), 256),
            ]),
            DynSolValue::Array(vec![
                DynSolValue::Uint(U256::from(10u64), 256),
                DynSolValue::Uint(U256::from(20u64), 256),
                DynSolValue::Uint(U256::from(30u64), 256),
            ]),
        ])
        .abi_encode_params();
        let raw = log(
            vec![
                format!("{ERC1155_TRANSFER_BATCH_TOPIC:#x}"),
                word(Address::repeat_byte(0xaa)),
                word(Address::repeat_byte(1)),
                word(Address::repeat_byte(2)),
            ],
            payload,
        );
        let events = decode(&raw).unwrap().into_events();
        assert_eq!(events.len(), 3);
        for (i, ev) in events.iter().enumerate() {
            assert_eq!(ev.kind, TransferKind::BatchItem);
            assert_eq!(ev.token_id, U256::from(i as u64 + 1));
            assert_eq!(ev.quantity, U256::from((i as u64 + 1) * 10));
            assert_eq!(ev.block.batch_index, i as u32);
            assert_eq!(ev.from, Address::repeat_byte(1));
            assert_eq!(ev.tx_hash, B256::repeat_byte(0xee));
        }
    }

    #[test]
    fn batch_length_mismatch_is_an_error() {
        let payload = DynSolValue::Tuple(vec![
            DynSolValue::Array(vec![DynSolValue::Uint(U256::from(1u64), 256)]),
            DynSolValue::Array(vec![]),
        ])
        .abi_encode_params();
        let raw = log(
            vec![
                format!("{ERC1155_TRANSFER_BATCH_TOPIC:#x}"),
                word(Address::ZERO),
                word(Address::ZERO),
                word(Address::repeat_byte(2)),
            ],
            payload,
        );
        assert!(matches!(
            decode(&raw),
            Err(DecodeError::BatchLengthMismatch { ids: 1, values: 0 })
        ));
    }

    #[test]
    fn unknown_topic_is_unrecognized() {
        let raw = log(vec![format!("{:#x}", B256::repeat_byte(5))], vec![]);
        assert!(matches!(decode(&raw), Err(DecodeError::UnrecognizedEvent { .. })));
    }
}
