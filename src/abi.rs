//! Dynamic ABI codec.
//!
//! Watched contracts hand their ABI over as JSON, and callers hand method
//! arguments over as strings, so everything here is driven by
//! [`alloy::json_abi`] descriptors resolved at runtime rather than
//! compile-time `sol!` bindings. Conversion is deliberately tolerant where
//! the wallet platform is: integers accept base-10 or `0x` base-16, byte
//! arguments fall back to keccak-256 of the literal when they are not hex,
//! arrays arrive comma-separated.

use crate::error::{AbiError, Result};
use crate::types::{append_0x, parse_big_uint, strip_0x, EthLog};
use alloy::dyn_abi::{DynSolType, DynSolValue, EventExt, FunctionExt, JsonAbiExt, Specifier};
use alloy::json_abi::{Event, JsonAbi};
use alloy::primitives::{keccak256, Address, B256, I256};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::OnceLock;

pub const ERC20_ABI_JSON: &str = r#"[{"anonymous":false,"inputs":[{"indexed":true,"internalType":"address","name":"owner","type":"address"},{"indexed":true,"internalType":"address","name":"spender","type":"address"},{"indexed":false,"internalType":"uint256","name":"value","type":"uint256"}],"name":"Approval","type":"event"},{"anonymous":false,"inputs":[{"indexed":true,"internalType":"address","name":"from","type":"address"},{"indexed":true,"internalType":"address","name":"to","type":"address"},{"indexed":false,"internalType":"uint256","name":"value","type":"uint256"}],"name":"Transfer","type":"event"},{"constant":true,"inputs":[{"internalType":"address","name":"owner","type":"address"},{"internalType":"address","name":"spender","type":"address"}],"name":"allowance","outputs":[{"internalType":"uint256","name":"","type":"uint256"}],"payable":false,"stateMutability":"view","type":"function"},{"constant":false,"inputs":[{"internalType":"address","name":"spender","type":"address"},{"internalType":"uint256","name":"value","type":"uint256"}],"name":"approve","outputs":[{"internalType":"bool","name":"","type":"bool"}],"payable":false,"stateMutability":"nonpayable","type":"function"},{"constant":true,"inputs":[{"internalType":"address","name":"","type":"address"}],"name":"balanceOf","outputs":[{"internalType":"uint256","name":"","type":"uint256"}],"payable":false,"stateMutability":"view","type":"function"},{"constant":true,"inputs":[],"name":"decimals","outputs":[{"internalType":"uint8","name":"","type":"uint8"}],"payable":false,"stateMutability":"view","type":"function"},{"constant":true,"inputs":[],"name":"name","outputs":[{"internalType":"string","name":"","type":"string"}],"payable":false,"stateMutability":"view","type":"function"},{"constant":true,"inputs":[],"name":"symbol","outputs":[{"internalType":"string","name":"","type":"string"}],"payable":false,"stateMutability":"view","type":"function"},{"constant":true,"inputs":[],"name":"totalSupply","outputs":[{"internalType":"uint256","name":"","type":"uint256"}],"payable":false,"stateMutability":"view","type":"function"},{"constant":false,"inputs":[{"internalType":"address","name":"to","type":"address"},{"internalType":"uint256","name":"value","type":"uint256"}],"name":"transfer","outputs":[{"internalType":"bool","name":"","type":"bool"}],"payable":false,"stateMutability":"nonpayable","type":"function"},{"constant":false,"inputs":[{"internalType":"address","name":"from","type":"address"},{"internalType":"address","name":"to","type":"address"},{"internalType":"uint256","name":"value","type":"uint256"}],"name":"transferFrom","outputs":[{"internalType":"bool","name":"","type":"bool"}],"payable":false,"stateMutability":"nonpayable","type":"function"}]"#;

pub const ERC721_ABI_JSON: &str = r#"[{"anonymous":false,"inputs":[{"indexed":true,"internalType":"address","name":"from","type":"address"},{"indexed":true,"internalType":"address","name":"to","type":"address"},{"indexed":true,"internalType":"uint256","name":"tokenId","type":"uint256"}],"name":"Transfer","type":"event"},{"anonymous":false,"inputs":[{"indexed":true,"internalType":"address","name":"owner","type":"address"},{"indexed":true,"internalType":"address","name":"approved","type":"address"},{"indexed":true,"internalType":"uint256","name":"tokenId","type":"uint256"}],"name":"Approval","type":"event"},{"anonymous":false,"inputs":[{"indexed":true,"internalType":"address","name":"owner","type":"address"},{"indexed":true,"internalType":"address","name":"operator","type":"address"},{"indexed":false,"internalType":"bool","name":"approved","type":"bool"}],"name":"ApprovalForAll","type":"event"},{"inputs":[{"internalType":"bytes4","name":"interfaceId","type":"bytes4"}],"name":"supportsInterface","outputs":[{"internalType":"bool","name":"","type":"bool"}],"stateMutability":"view","type":"function"},{"inputs":[{"internalType":"address","name":"owner","type":"address"}],"name":"balanceOf","outputs":[{"internalType":"uint256","name":"balance","type":"uint256"}],"stateMutability":"view","type":"function"},{"inputs":[{"internalType":"uint256","name":"tokenId","type":"uint256"}],"name":"ownerOf","outputs":[{"internalType":"address","name":"owner","type":"address"}],"stateMutability":"view","type":"function"},{"inputs":[],"name":"name","outputs":[{"internalType":"string","name":"","type":"string"}],"stateMutability":"view","type":"function"},{"inputs":[],"name":"symbol","outputs":[{"internalType":"string","name":"","type":"string"}],"stateMutability":"view","type":"function"},{"inputs":[{"internalType":"uint256","name":"tokenId","type":"uint256"}],"name":"tokenURI","outputs":[{"internalType":"string","name":"","type":"string"}],"stateMutability":"view","type":"function"},{"inputs":[{"internalType":"address","name":"from","type":"address"},{"internalType":"address","name":"to","type":"address"},{"internalType":"uint256","name":"tokenId","type":"uint256"}],"name":"safeTransferFrom","outputs":[],"stateMutability":"nonpayable","type":"function"},{"inputs":[{"internalType":"address","name":"from","type":"address"},{"internalType":"address","name":"to","type":"address"},{"internalType":"uint256","name":"tokenId","type":"uint256"}],"name":"transferFrom","outputs":[],"stateMutability":"nonpayable","type":"function"}]"#;

pub const ERC1155_ABI_JSON: &str = r#"[{"anonymous":false,"inputs":[{"indexed":true,"internalType":"address","name":"operator","type":"address"},{"indexed":true,"internalType":"address","name":"from","type":"address"},{"indexed":true,"internalType":"address","name":"to","type":"address"},{"indexed":false,"internalType":"uint256","name":"id","type":"uint256"},{"indexed":false,"internalType":"uint256","name":"value","type":"uint256"}],"name":"TransferSingle","type":"event"},{"anonymous":false,"inputs":[{"indexed":true,"internalType":"address","name":"operator","type":"address"},{"indexed":true,"internalType":"address","name":"from","type":"address"},{"indexed":true,"internalType":"address","name":"to","type":"address"},{"indexed":false,"internalType":"uint256[]","name":"ids","type":"uint256[]"},{"indexed":false,"internalType":"uint256[]","name":"values","type":"uint256[]"}],"name":"TransferBatch","type":"event"},{"anonymous":false,"inputs":[{"indexed":true,"internalType":"address","name":"account","type":"address"},{"indexed":true,"internalType":"address","name":"operator","type":"address"},{"indexed":false,"internalType":"bool","name":"approved","type":"bool"}],"name":"ApprovalForAll","type":"event"},{"anonymous":false,"inputs":[{"indexed":false,"internalType":"string","name":"value","type":"string"},{"indexed":true,"internalType":"uint256","name":"id","type":"uint256"}],"name":"URI","type":"event"},{"inputs":[{"internalType":"bytes4","name":"interfaceId","type":"bytes4"}],"name":"supportsInterface","outputs":[{"internalType":"bool","name":"","type":"bool"}],"stateMutability":"view","type":"function"},{"inputs":[{"internalType":"address","name":"account","type":"address"},{"internalType":"uint256","name":"id","type":"uint256"}],"name":"balanceOf","outputs":[{"internalType":"uint256","name":"","type":"uint256"}],"stateMutability":"view","type":"function"},{"inputs":[{"internalType":"address[]","name":"accounts","type":"address[]"},{"internalType":"uint256[]","name":"ids","type":"uint256[]"}],"name":"balanceOfBatch","outputs":[{"internalType":"uint256[]","name":"","type":"uint256[]"}],"stateMutability":"view","type":"function"},{"inputs":[{"internalType":"uint256","name":"id","type":"uint256"}],"name":"uri","outputs":[{"internalType":"string","name":"","type":"string"}],"stateMutability":"view","type":"function"},{"inputs":[],"name":"name","outputs":[{"internalType":"string","name":"","type":"string"}],"stateMutability":"view","type":"function"},{"inputs":[],"name":"symbol","outputs":[{"internalType":"string","name":"","type":"string"}],"stateMutability":"view","type":"function"}]"#;

/// Process-scope ERC-20 ABI, parsed once.
pub fn erc20_abi() -> &'static JsonAbi {
    static ABI: OnceLock<JsonAbi> = OnceLock::new();
    ABI.get_or_init(|| serde_json::from_str(ERC20_ABI_JSON).expect("ERC-20 ABI constant parses"))
}

/// Process-scope ERC-721 ABI, parsed once.
pub fn erc721_abi() -> &'static JsonAbi {
    static ABI: OnceLock<JsonAbi> = OnceLock::new();
    ABI.get_or_init(|| serde_json::from_str(ERC721_ABI_JSON).expect("ERC-721 ABI constant parses"))
}

/// Process-scope ERC-1155 ABI, parsed once.
pub fn erc1155_abi() -> &'static JsonAbi {
    static ABI: OnceLock<JsonAbi> = OnceLock::new();
    ABI.get_or_init(|| {
        serde_json::from_str(ERC1155_ABI_JSON).expect("ERC-1155 ABI constant parses")
    })
}

pub fn parse_abi_json(abi_json: &str) -> Result<JsonAbi> {
    serde_json::from_str(abi_json).map_err(|err| AbiError::Parse(err.to_string()).into())
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a method call from string arguments: `abi_param[0]` is the method
/// name, the rest are its inputs in declaration order.
pub fn encode_abi_param(abi: &JsonAbi, abi_param: &[&str]) -> Result<Vec<u8>> {
    let Some((method, args)) = abi_param.split_first() else {
        return Err(AbiError::MethodNotFound(String::new()).into());
    };
    let function = abi
        .function(method)
        .and_then(|overloads| overloads.first())
        .ok_or_else(|| AbiError::MethodNotFound(method.to_string()))?;

    if function.inputs.len() != args.len() {
        return Err(AbiError::ArgumentCount {
            method: method.to_string(),
            expected: function.inputs.len(),
            got: args.len(),
        }
        .into());
    }

    let mut values = Vec::with_capacity(args.len());
    for (input, arg) in function.inputs.iter().zip(args) {
        let ty = input
            .resolve()
            .map_err(|err| AbiError::Parse(err.to_string()))?;
        values.push(convert_string_param(&ty, arg)?);
    }

    function
        .abi_encode_input(&values)
        .map_err(|err| AbiError::Encode(err.to_string()).into())
}

/// Convert one string argument to the declared Solidity type.
fn convert_string_param(ty: &DynSolType, arg: &str) -> Result<DynSolValue> {
    let arg = arg.trim();
    match ty {
        DynSolType::Bool => Ok(DynSolValue::Bool(parse_bool(arg))),
        DynSolType::Uint(size) => {
            let value = parse_big_uint(arg).ok_or_else(|| invalid(ty, arg, "not an integer"))?;
            if value.bit_len() > *size {
                return Err(invalid(ty, arg, "does not fit the declared width").into());
            }
            Ok(DynSolValue::Uint(value, *size))
        }
        DynSolType::Int(size) => {
            let value = parse_big_int(arg).ok_or_else(|| invalid(ty, arg, "not an integer"))?;
            Ok(DynSolValue::Int(value, *size))
        }
        DynSolType::Address => {
            let parsed = Address::from_str(&append_0x(arg))
                .map_err(|err| invalid(ty, arg, &err.to_string()))?;
            Ok(DynSolValue::Address(parsed))
        }
        DynSolType::FixedBytes(size) => {
            let slice = decode_bytes_arg(arg);
            Ok(DynSolValue::FixedBytes(
                pack_fixed_bytes(&slice, *size)
                    .ok_or_else(|| invalid(ty, arg, "length mismatch for fixed bytes"))?,
                *size,
            ))
        }
        DynSolType::Bytes => Ok(DynSolValue::Bytes(decode_bytes_arg(arg))),
        DynSolType::String => Ok(DynSolValue::String(arg.to_string())),
        DynSolType::Array(inner) => {
            let elems = split_array_arg(arg)
                .map(|sub| convert_string_param(inner, sub))
                .collect::<Result<Vec<_>>>()?;
            Ok(DynSolValue::Array(elems))
        }
        DynSolType::FixedArray(inner, len) => {
            let elems = split_array_arg(arg)
                .map(|sub| convert_string_param(inner, sub))
                .collect::<Result<Vec<_>>>()?;
            if elems.len() != *len {
                return Err(invalid(ty, arg, "array length mismatch").into());
            }
            Ok(DynSolValue::FixedArray(elems))
        }
        other => Err(invalid(other, arg, "unsupported parameter type").into()),
    }
}

fn invalid(ty: &DynSolType, value: &str, reason: &str) -> AbiError {
    AbiError::InvalidArgument {
        ty: ty.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(arg: &str) -> bool {
    matches!(arg.to_ascii_lowercase().as_str(), "true" | "1")
}

fn parse_big_int(arg: &str) -> Option<I256> {
    let (negative, body) = match arg.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, arg),
    };
    let magnitude = parse_big_uint(body)?;
    let value = I256::try_from(magnitude).ok()?;
    Some(if negative { -value } else { value })
}

/// Hex-decode a byte argument, falling back to keccak-256 of the literal.
/// The fallback lets callers pass arbitrary strings where a bytes32 key is
/// expected.
fn decode_bytes_arg(arg: &str) -> Vec<u8> {
    match hex::decode(strip_0x(arg)) {
        Ok(bytes) => bytes,
        Err(_) => keccak256(arg.as_bytes()).to_vec(),
    }
}

/// Left-align a decoded slice into a 32-byte word for `bytesN`.
///
/// Only even widths in 2..=32 are accepted, and the slice must not exceed
/// the declared width.
fn pack_fixed_bytes(slice: &[u8], size: usize) -> Option<B256> {
    if size < 2 || size > 32 || size % 2 != 0 {
        return None;
    }
    if slice.len() > size {
        return None;
    }
    let mut word = B256::ZERO;
    word[..slice.len()].copy_from_slice(slice);
    Some(word)
}

fn split_array_arg(arg: &str) -> impl Iterator<Item = &str> {
    arg.split(',').map(str::trim).filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a call's return data into a map keyed by output parameter name
/// (unnamed outputs key the empty string), plus the JSON projection.
///
/// Empty return data yields an empty map, not an error.
pub fn decode_abi_result(
    abi: &JsonAbi,
    method: &str,
    data_hex: &str,
) -> Result<(BTreeMap<String, DynSolValue>, String)> {
    let mut result = BTreeMap::new();
    let data = hex::decode(strip_0x(data_hex)).unwrap_or_default();
    if data.is_empty() {
        return Ok((result, "{}".to_string()));
    }

    let function = abi
        .function(method)
        .and_then(|overloads| overloads.first())
        .ok_or_else(|| AbiError::MethodNotFound(method.to_string()))?;

    let values = function
        .abi_decode_output(&data)
        .map_err(|err| AbiError::Decode(err.to_string()))?;

    let mut projection = serde_json::Map::new();
    for (output, value) in function.outputs.iter().zip(values) {
        projection.insert(output.name.clone(), dyn_value_to_json(&value));
        result.insert(output.name.clone(), value);
    }
    let json = serde_json::to_string(&Value::Object(projection))
        .map_err(|err| AbiError::Decode(err.to_string()))?;
    Ok((result, json))
}

/// Look up a receipt log's event by topic-0 and decode it into a map keyed
/// by the event's input names. Returns the event name and the JSON
/// projection alongside.
pub fn decode_receipt_log(
    abi: &JsonAbi,
    log: &EthLog,
) -> Result<(BTreeMap<String, DynSolValue>, String, String)> {
    let Some(topic0) = log.topics.first() else {
        return Err(AbiError::EventNotFound("<no topics>".to_string()).into());
    };
    let selector = parse_topic(topic0)
        .ok_or_else(|| AbiError::Decode(format!("topic `{topic0}` is not a 32-byte hash")))?;

    let event = find_event_by_topic(abi, &selector)
        .ok_or_else(|| AbiError::EventNotFound(topic0.clone()))?;

    let topics = log
        .topics
        .iter()
        .map(|t| parse_topic(t))
        .collect::<Option<Vec<B256>>>()
        .ok_or_else(|| AbiError::Decode("log topic is not a 32-byte hash".to_string()))?;
    let data = hex::decode(strip_0x(&log.data)).unwrap_or_default();

    let decoded = event
        .decode_log_parts(topics, &data)
        .map_err(|err| AbiError::Decode(err.to_string()))?;

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut result = BTreeMap::new();
    let mut projection = serde_json::Map::new();
    for input in &event.inputs {
        let value = if input.indexed {
            indexed.next()
        } else {
            body.next()
        };
        let Some(value) = value else {
            return Err(AbiError::Decode(format!(
                "event `{}` decoded fewer values than declared inputs",
                event.name
            ))
            .into());
        };
        projection.insert(input.name.clone(), dyn_value_to_json(&value));
        result.insert(input.name.clone(), value);
    }

    let json = serde_json::to_string(&Value::Object(projection))
        .map_err(|err| AbiError::Decode(err.to_string()))?;
    Ok((result, event.name.clone(), json))
}

fn find_event_by_topic<'a>(abi: &'a JsonAbi, selector: &B256) -> Option<&'a Event> {
    abi.events
        .values()
        .flatten()
        .find(|event| !event.anonymous && event.selector() == *selector)
}

fn parse_topic(topic: &str) -> Option<B256> {
    let bytes = hex::decode(strip_0x(topic)).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    Some(B256::from_slice(&bytes))
}

/// JSON projection rules: byte-likes as `0x` hex, integers as decimal
/// strings, addresses lowercase.
pub fn dyn_value_to_json(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Address(a) => Value::String(format!("{a:#x}")),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word[..*size])))
        }
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(values) | DynSolValue::FixedArray(values) | DynSolValue::Tuple(values) => {
            Value::Array(values.iter().map(dyn_value_to_json).collect())
        }
        DynSolValue::Function(f) => Value::String(format!("0x{}", hex::encode(f.as_slice()))),
        _ => Value::Null,
    }
}
