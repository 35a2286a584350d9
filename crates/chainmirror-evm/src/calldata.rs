//! Exchange calldata decoding.
//!
//! Extracts the order signatures carried by a settlement transaction so the
//! matcher can look the orders up. Covers the Seaport fulfillment entry points
//! and the reward wrapper's forwarding variants:
//!
//! - `fulfillOrder(Order, bytes32)` / wrapper `fulfillOrder(Order)`
//! - `fulfillAdvancedOrder(AdvancedOrder, CriteriaResolver[], bytes32, address)`
//! - `fulfillAvailableOrders(Order[], …, bytes32, uint256)` / wrapper form without the conduit key
//! - `fulfillAvailableAdvancedOrders(AdvancedOrder[], …)`
//! - `fulfillBasicOrder(BasicOrderParameters)` and its gas-optimised alias
//!
//! Selectors are `keccak256(signature)[..4]`; inputs are decoded with
//! `alloy-dyn-abi` against the canonical tuple layout.

use std::sync::OnceLock;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::keccak256;
use chainmirror_core::Bytes;

use crate::error::DecodeError;

const ORDER_PARAMETERS: &str = "(address,address,(uint8,address,uint256,uint256,uint256)[],(uint8,address,uint256,uint256,uint256,address)[],uint8,uint256,uint256,bytes32,uint256,bytes32,uint256)";
const CRITERIA_RESOLVER: &str = "(uint256,uint8,uint256,uint256,bytes32[])";
const FULFILLMENT_COMPONENT: &str = "(uint256,uint256)";
const BASIC_ORDER_PARAMETERS: &str = "(address,uint256,uint256,address,address,address,uint256,uint256,uint8,uint256,uint256,bytes32,uint256,bytes32,bytes32,uint256,(uint256,address)[],bytes)";

/// Index of the signature inside `Order`.
const ORDER_SIGNATURE_FIELD: usize = 1;
/// Index of the signature inside `AdvancedOrder`.
const ADVANCED_SIGNATURE_FIELD: usize = 3;
/// Index of the signature inside `BasicOrderParameters`.
const BASIC_SIGNATURE_FIELD: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeFunction {
    FulfillOrder,
    FulfillAdvancedOrder,
    FulfillAvailableOrders,
    FulfillAvailableAdvancedOrders,
    FulfillBasicOrder,
}

/// Where the signatures live in the decoded first argument.
#[derive(Debug, Clone, Copy)]
enum SignaturePath {
    /// First argument is one struct; signature at `field`.
    Struct { field: usize },
    /// First argument is an array of structs; signature at `field` of each.
    Array { field: usize },
}

struct FunctionSpec {
    function: ExchangeFunction,
    signature: String,
    name_len: usize,
    selector: [u8; 4],
    path: SignaturePath,
}

/// Decoded settlement call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeCall {
    pub function: ExchangeFunction,
    /// Order signatures in argument order.
    pub signatures: Vec<Bytes>,
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn functions() -> &'static [FunctionSpec] {
    static TABLE: OnceLock<Vec<FunctionSpec>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let order = format!("({ORDER_PARAMETERS},bytes)");
        let advanced = format!("({ORDER_PARAMETERS},uint120,uint120,bytes,bytes)");
        let fc = FULFILLMENT_COMPONENT;
        let entries = [
            (
                ExchangeFunction::FulfillOrder,
                "fulfillOrder",
                format!("({order},bytes32)"),
                SignaturePath::Struct { field: ORDER_SIGNATURE_FIELD },
            ),
            (
                ExchangeFunction::FulfillOrder,
                "fulfillOrder",
                format!("({order})"),
                SignaturePath::Struct { field: ORDER_SIGNATURE_FIELD },
            ),
            (
                ExchangeFunction::FulfillAdvancedOrder,
                "fulfillAdvancedOrder",
                format!("({advanced},{CRITERIA_RESOLVER}[],bytes32,address)"),
                SignaturePath::Struct { field: ADVANCED_SIGNATURE_FIELD },
            ),
            (
                ExchangeFunction::FulfillAvailableOrders,
                "fulfillAvailableOrders",
                format!("({order}[],{fc}[][],{fc}[][],bytes32,uint256)"),
                SignaturePath::Array { field: ORDER_SIGNATURE_FIELD },
            ),
            (
                ExchangeFunction::FulfillAvailableOrders,
                "fulfillAvailableOrders",
                format!("({order}[],{fc}[][],{fc}[][],uint256)"),
                SignaturePath::Array { field: ORDER_SIGNATURE_FIELD },
            ),
            (
                ExchangeFunction::FulfillAvailableAdvancedOrders,
                "fulfillAvailableAdvancedOrders",
                format!("({advanced}[],{CRITERIA_RESOLVER}[],{fc}[][],{fc}[][],bytes32,address,uint256)"),
                SignaturePath::Array { field: ADVANCED_SIGNATURE_FIELD },
            ),
            (
                ExchangeFunction::FulfillBasicOrder,
                "fulfillBasicOrder",
                format!("({BASIC_ORDER_PARAMETERS})"),
                SignaturePath::Struct { field: BASIC_SIGNATURE_FIELD },
            ),
            (
                ExchangeFunction::FulfillBasicOrder,
                "fulfillBasicOrder_efficient_6GL6yc",
                format!("({BASIC_ORDER_PARAMETERS})"),
                SignaturePath::Struct { field: BASIC_SIGNATURE_FIELD },
            ),
        ];
        entries
            .into_iter()
            .map(|(function, name, params, path)| {
                let signature = format!("{name}{params}");
                FunctionSpec {
                    function,
                    selector: selector(&signature),
                    name_len: name.len(),
                    signature,
                    path,
                }
            })
            .collect()
    })
}

/// Canonical signatures of every supported fulfillment function.
pub fn supported_signatures() -> Vec<&'static str> {
    functions().iter().map(|f| f.signature.as_str()).collect()
}

/// Decode settlement calldata into the order signatures it carries.
pub fn decode_exchange_call(input: &[u8]) -> Result<ExchangeCall, DecodeError> {
    if input.len() < 4 {
        return Err(DecodeError::AbiDecodeFailed {
            reason: format!("calldata too short: {} bytes", input.len()),
        });
    }
    let sel = &input[..4];
    let spec = functions()
        .iter()
        .find(|f| f.selector == sel)
        .ok_or_else(|| DecodeError::UnknownSelector {
            selector: hex::encode(sel),
        })?;

    let params = DynSolType::parse(&spec.signature[spec.name_len..])
        .map_err(|e| DecodeError::AbiDecodeFailed { reason: e.to_string() })?;
    let decoded = params
        .abi_decode_params(&input[4..])
        .map_err(|e| DecodeError::AbiDecodeFailed { reason: e.to_string() })?;

    let first = decoded
        .as_tuple()
        .and_then(|args| args.first())
        .ok_or_else(|| DecodeError::AbiDecodeFailed {
            reason: "missing first argument".into(),
        })?;

    let signatures = match spec.path {
        SignaturePath::Struct { field } => vec![signature_at(first, field)?],
        SignaturePath::Array { field } => first
            .as_array()
            .ok_or_else(|| DecodeError::AbiDecodeFailed {
                reason: "expected an array of orders".into(),
            })?
            .iter()
            .map(|order| signature_at(order, field))
            .collect::<Result<Vec<_>, _>>()?,
    };

    Ok(ExchangeCall {
        function: spec.function,
        signatures,
    })
}

fn signature_at(value: &DynSolValue, field: usize) -> Result<Bytes, DecodeError> {
    value
        .as_tuple()
        .and_then(|fields| fields.get(field))
        .and_then(|f| f.as_bytes())
        .map(|b| Bytes::copy_from_slice(b))
        .ok_or_else(|| DecodeError::AbiDecodeFailed {
            reason: format!("no signature bytes at field {field}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainmirror_core::{Address, B256, U256};

    fn uint(n: u64, bits: usize) -> DynSolValue {
        DynSolValue::Uint(U256::from(n), bits)
    }

    fn order_parameters() -> DynSolValue {
        DynSolValue::Tuple(vec![
            DynSolValue::Address(Address::repeat_byte(1)),
            DynSolValue::Address(Address::ZERO),
            DynSolValue::Array(vec![DynSolValue::Tuple(vec![
                uint(2, 8),
                DynSolValue::Address(Address::repeat_byte(0xcc)),
                uint(7, 256),
                uint(1, 256),
                uint(1, 256),
            ])]),
            DynSolValue::Array(vec![]),
            uint(0, 8),
            uint(0, 256),
            uint(u32::MAX as u64, 256),
            DynSolValue::FixedBytes(B256::ZERO, 32),
            uint(42, 256),
            DynSolValue::FixedBytes(B256::ZERO, 32),
            uint(0, 256),
        ])
    }

    fn order(sig: &[u8]) -> DynSolValue {
        DynSolValue::Tuple(vec![order_parameters(), DynSolValue::Bytes(sig.to_vec())])
    }

    fn advanced(sig: &[u8]) -> DynSolValue {
        DynSolValue::Tuple(vec![
            order_parameters(),
            uint(1, 120),
            uint(1, 120),
            DynSolValue::Bytes(sig.to_vec()),
            DynSolValue::Bytes(vec![]),
        ])
    }

    fn calldata(signature: &str, args: Vec<DynSolValue>) -> Vec<u8> {
        let mut data = selector(signature).to_vec();
        data.extend(DynSolValue::Tuple(args).abi_encode_params());
        data
    }

    fn signature_of(prefix: &str, arity_marker: &str) -> &'static str {
        supported_signatures()
            .into_iter()
            .find(|s| s.starts_with(prefix) && s.ends_with(arity_marker))
            .unwrap()
    }

    #[test]
    fn selectors_are_distinct() {
        let mut sels: Vec<[u8; 4]> = functions().iter().map(|f| f.selector).collect();
        sels.sort();
        sels.dedup();
        assert_eq!(sels.len(), functions().len());
    }

    #[test]
    fn seaport_fulfill_order_selector() {
        // Published Seaport selector for fulfillOrder(Order,bytes32).
        let sig = signature_of("fulfillOrder(", ",bytes32)");
        assert_eq!(hex::encode(selector(sig)), "b3a34c4c");
    }

    #[test]
    fn decodes_exchange_fulfill_order() {
        let sig = signature_of("fulfillOrder(", ",bytes32)");
        let data = calldata(sig, vec![order(&[0xab; 65]), DynSolValue::FixedBytes(B256::ZERO, 32)]);
        let call = decode_exchange_call(&data).unwrap();
        assert_eq!(call.function, ExchangeFunction::FulfillOrder);
        assert_eq!(call.signatures, vec![Bytes::from(vec![0xab; 65])]);
    }

    #[test]
    fn decodes_wrapper_fulfill_order() {
        let sig = signature_of("fulfillOrder(", ",bytes))");
        let data = calldata(sig, vec![order(&[0x01, 0x02])]);
        let call = decode_exchange_call(&data).unwrap();
        assert_eq!(call.signatures, vec![Bytes::from(vec![0x01, 0x02])]);
    }

    #[test]
    fn decodes_available_advanced_orders() {
        let sig = signature_of("fulfillAvailableAdvancedOrders(", ")");
        let data = calldata(
            sig,
            vec![
                DynSolValue::Array(vec![advanced(&[0x11]), advanced(&[0x22])]),
                DynSolValue::Array(vec![]),
                DynSolValue::Array(vec![]),
                DynSolValue::Array(vec![]),
                DynSolValue::FixedBytes(B256::ZERO, 32),
                DynSolValue::Address(Address::repeat_byte(9)),
                uint(2, 256),
            ],
        );
        let call = decode_exchange_call(&data).unwrap();
        assert_eq!(call.function, ExchangeFunction::FulfillAvailableAdvancedOrders);
        assert_eq!(
            call.signatures,
            vec![Bytes::from(vec![0x11]), Bytes::from(vec![0x22])]
        );
    }

    #[test]
    fn decodes_basic_order() {
        let mut fields: Vec<DynSolValue> = vec![
            DynSolValue::Address(Address::ZERO),
            uint(0, 256),
            uint(100, 256),
            DynSolValue::Address(Address::repeat_byte(1)),
            DynSolValue::Address(Address::ZERO),
            DynSolValue::Address(Address::repeat_byte(0xcc)),
            uint(7, 256),
            uint(1, 256),
            uint(0, 8),
            uint(0, 256),
            uint(10, 256),
            DynSolValue::FixedBytes(B256::ZERO, 32),
            uint(1, 256),
            DynSolValue::FixedBytes(B256::ZERO, 32),
            DynSolValue::FixedBytes(B256::ZERO, 32),
            uint(0, 256),
            DynSolValue::Array(vec![]),
        ];
        fields.push(DynSolValue::Bytes(vec![0x5e; 64]));
        let sig = signature_of("fulfillBasicOrder(", ")");
        let data = calldata(sig, vec![DynSolValue::Tuple(fields)]);
        let call = decode_exchange_call(&data).unwrap();
        assert_eq!(call.function, ExchangeFunction::FulfillBasicOrder);
        assert_eq!(call.signatures, vec![Bytes::from(vec![0x5e; 64])]);
    }

    #[test]
    fn unknown_selector_and_short_input() {
        assert!(matches!(
            decode_exchange_call(&[0xde, 0xad, 0xbe, 0xef, 0, 0]),
            Err(DecodeError::UnknownSelector { .. })
        ));
        assert!(decode_exchange_call(&[0x01]).is_err());
    }
}
