//! Wire and domain types shared across the adapter.
//!
//! Wire structs mirror the node's JSON-RPC shapes (hex-string numerics,
//! camelCase keys); domain records are what observers and the wallet
//! platform consume.

use alloy::primitives::{keccak256, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Hex / numeric helpers
// ---------------------------------------------------------------------------

/// Ensure a hex value carries the `0x` prefix.
pub fn append_0x(value: &str) -> String {
    if value.starts_with("0x") || value.starts_with("0X") {
        value.to_string()
    } else {
        format!("0x{value}")
    }
}

/// Strip an optional `0x` prefix.
pub fn strip_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Lowercase, `0x`-prefixed normal form used for all address comparisons.
pub fn normalize_address(addr: &str) -> String {
    append_0x(addr.trim()).to_ascii_lowercase()
}

/// Parse a decimal or `0x`-prefixed hex big integer.
pub fn parse_big_uint(value: &str) -> Option<U256> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(hexpart) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        if hexpart.is_empty() {
            return Some(U256::ZERO);
        }
        return U256::from_str_radix(hexpart, 16).ok();
    }
    U256::from_str_radix(trimmed, 10).ok()
}

/// Parse a `0x` hex quantity into a u64, tolerating decimal input.
pub fn parse_u64(value: &str) -> Option<u64> {
    parse_big_uint(value).and_then(|v| u64::try_from(v).ok())
}

pub fn encode_u64(value: u64) -> String {
    format!("0x{value:x}")
}

pub fn encode_big_uint(value: &U256) -> String {
    format!("0x{value:x}")
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Decimal scaling
// ---------------------------------------------------------------------------

/// Render a wei-scale integer as an exact decimal string with `decimals`
/// fractional digits, trimming trailing zeros ("1", "0.5", "0.000000000000000001").
pub fn amount_to_decimal_string(value: &U256, decimals: u32) -> String {
    let digits = value.to_string();
    if decimals == 0 {
        return digits;
    }
    let decimals = decimals as usize;
    let (int_part, frac_part) = if digits.len() > decimals {
        let split = digits.len() - decimals;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        (
            "0".to_string(),
            format!("{:0>width$}", digits, width = decimals),
        )
    };
    let frac_trimmed = frac_part.trim_end_matches('0');
    if frac_trimmed.is_empty() {
        int_part
    } else {
        format!("{int_part}.{frac_trimmed}")
    }
}

/// Parse a decimal amount string into a wei-scale integer with `decimals`
/// fractional digits. Extra fractional digits are truncated.
pub fn decimal_string_to_amount(value: &str, decimals: u32) -> Option<U256> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (int_part, frac_part) = match trimmed.split_once('.') {
        Some((i, f)) => (i, f),
        None => (trimmed, ""),
    };
    if !int_part.chars().all(|c| c.is_ascii_digit()) && !int_part.is_empty() {
        return None;
    }
    if !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let decimals = decimals as usize;
    let mut frac = frac_part.to_string();
    frac.truncate(decimals);
    let scaled = format!(
        "{}{:0<width$}",
        if int_part.is_empty() { "0" } else { int_part },
        frac,
        width = decimals
    );
    U256::from_str_radix(&scaled, 10).ok()
}

/// Add two non-negative decimal strings exactly ("1.5" + "0.25" = "1.75").
pub fn add_decimal_strings(a: &str, b: &str) -> Option<String> {
    fn frac_len(s: &str) -> usize {
        s.split_once('.').map(|(_, f)| f.len()).unwrap_or(0)
    }
    let scale = frac_len(a).max(frac_len(b)) as u32;
    let left = decimal_string_to_amount(a, scale)?;
    let right = decimal_string_to_amount(b, scale)?;
    Some(amount_to_decimal_string(&(left + right), scale))
}

// ---------------------------------------------------------------------------
// Deterministic identifiers
// ---------------------------------------------------------------------------

/// Stable contract identifier derived from the symbol and the contract address.
pub fn gen_contract_id(symbol: &str, address: &str) -> String {
    let tag = format!("{}_{}", symbol, normalize_address(address));
    hex::encode(keccak256(tag.as_bytes()))
}

/// Deterministic record id for an extracted input leg.
pub fn gen_tx_input_sid(tx_id: &str, symbol: &str, contract_id: &str, index: u64) -> String {
    gen_sid("input", tx_id, symbol, contract_id, index)
}

/// Deterministic record id for an extracted output leg.
pub fn gen_tx_output_sid(tx_id: &str, symbol: &str, contract_id: &str, index: u64) -> String {
    gen_sid("output", tx_id, symbol, contract_id, index)
}

fn gen_sid(direction: &str, tx_id: &str, symbol: &str, contract_id: &str, index: u64) -> String {
    let tag = format!("{direction}|{tx_id}|{symbol}|{contract_id}|{index}");
    hex::encode(keccak256(tag.as_bytes()))
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockHeader {
    #[serde(rename = "number", default)]
    pub block_number: String,
    #[serde(rename = "hash", default)]
    pub block_hash: String,
    #[serde(rename = "gasLimit", default)]
    pub gas_limit: String,
    #[serde(rename = "gasUsed", default)]
    pub gas_used: String,
    #[serde(default)]
    pub miner: String,
    #[serde(default)]
    pub difficulty: String,
    #[serde(rename = "parentHash", default)]
    pub parent_hash: String,
    /// Decoded from `block_number` after fetch.
    #[serde(skip)]
    pub block_height: u64,
    /// Set on fork notifications for the abandoned block.
    #[serde(skip)]
    pub fork: bool,
    #[serde(skip)]
    pub symbol: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EthBlock {
    #[serde(flatten)]
    pub header: BlockHeader,
    #[serde(default)]
    pub transactions: Vec<BlockTransaction>,
}

impl EthBlock {
    pub fn notify_header(&self, symbol: &str, fork: bool) -> BlockHeader {
        let mut header = self.header.clone();
        header.symbol = symbol.to_string();
        header.fork = fork;
        header
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockTransaction {
    #[serde(default)]
    pub hash: String,
    #[serde(rename = "blockNumber", default)]
    pub block_number: String,
    #[serde(rename = "blockHash", default)]
    pub block_hash: String,
    #[serde(default)]
    pub from: String,
    /// Empty for contract creation.
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub gas: String,
    #[serde(rename = "gasPrice", default)]
    pub gas_price: String,
    #[serde(default)]
    pub value: String,
    #[serde(rename = "input", default)]
    pub data: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(rename = "transactionIndex", default)]
    pub tx_index: String,
    #[serde(skip)]
    pub block_height: u64,
    #[serde(skip)]
    pub status: u64,
    #[serde(skip)]
    pub receipt: Option<TransactionReceipt>,
    #[serde(skip)]
    pub decimals: u32,
}

impl BlockTransaction {
    pub fn to_address(&self) -> String {
        self.to.clone().unwrap_or_default()
    }

    /// Native amount scaled to the configured decimals.
    pub fn amount_string(&self) -> String {
        let amount = parse_big_uint(&self.value).unwrap_or(U256::ZERO);
        amount_to_decimal_string(&amount, self.decimals)
    }

    /// Fee = gas used × gas price, scaled to the configured decimals.
    pub fn fee_string(&self) -> String {
        let gas = parse_big_uint(&self.gas).unwrap_or(U256::ZERO);
        let price = parse_big_uint(&self.gas_price).unwrap_or(U256::ZERO);
        amount_to_decimal_string(&(gas * price), self.decimals)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EthLog {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(rename = "logIndex", default)]
    pub log_index: String,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EthReceipt {
    #[serde(rename = "transactionHash", default)]
    pub tx_hash: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "gasUsed", default)]
    pub gas_used: String,
    #[serde(rename = "cumulativeGasUsed", default)]
    pub cumulative_gas_used: String,
    #[serde(rename = "contractAddress", default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub logs: Vec<EthLog>,
}

/// Receipt plus the raw JSON it was decoded from; the raw form travels with
/// contract extraction records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub receipt: EthReceipt,
    pub raw: String,
}

impl TransactionReceipt {
    pub fn from_raw_json(raw: &str) -> Option<Self> {
        let receipt: EthReceipt = serde_json::from_str(raw).ok()?;
        Some(Self {
            receipt,
            raw: raw.to_string(),
        })
    }

    pub fn status_u64(&self) -> u64 {
        parse_u64(&self.receipt.status).unwrap_or(0)
    }

    /// Decoded ERC-20 `Transfer` events grouped by lowercase contract address.
    ///
    /// Logs whose topic count differs from the three-topic `Transfer` shape
    /// are skipped.
    pub fn parse_transfer_events(&self) -> BTreeMap<String, Vec<TransferEvent>> {
        let mut grouped: BTreeMap<String, Vec<TransferEvent>> = BTreeMap::new();
        for log in &self.receipt.logs {
            if log.topics.len() != 3 {
                continue;
            }
            if normalize_address(&log.topics[0]) != transfer_event_topic() {
                continue;
            }
            let from = topic_to_address(&log.topics[1]);
            let to = topic_to_address(&log.topics[2]);
            let value = parse_big_uint(&log.data).unwrap_or(U256::ZERO);
            let contract = normalize_address(&log.address);
            grouped.entry(contract.clone()).or_default().push(TransferEvent {
                contract_address: contract,
                from,
                to,
                value,
            });
        }
        grouped
    }
}

/// keccak-256 of `Transfer(address,address,uint256)`, lowercase `0x` hex.
pub fn transfer_event_topic() -> &'static str {
    static TOPIC: OnceLock<String> = OnceLock::new();
    TOPIC.get_or_init(|| {
        let hash: B256 = keccak256(b"Transfer(address,address,uint256)");
        format!("0x{}", hex::encode(hash))
    })
}

fn topic_to_address(topic: &str) -> String {
    let raw = strip_0x(topic);
    if raw.len() >= 40 {
        format!("0x{}", &raw[raw.len() - 40..]).to_ascii_lowercase()
    } else {
        normalize_address(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub contract_address: String,
    pub from: String,
    pub to: String,
    pub value: U256,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    pub syncing: bool,
    pub current_block_height: u64,
    pub network_block_height: u64,
}

// ---------------------------------------------------------------------------
// Call messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CallMsg {
    pub from: String,
    pub to: String,
    pub value: Option<U256>,
    pub data: Vec<u8>,
    pub gas: Option<u64>,
    pub gas_price: Option<U256>,
    pub nonce: Option<u64>,
}

impl CallMsg {
    /// JSON-RPC call object with hex-encoded numerics.
    pub fn to_call_object(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        if !self.from.is_empty() {
            obj.insert("from".into(), serde_json::Value::String(self.from.clone()));
        }
        if !self.to.is_empty() {
            obj.insert("to".into(), serde_json::Value::String(self.to.clone()));
        }
        if let Some(value) = &self.value {
            obj.insert(
                "value".into(),
                serde_json::Value::String(encode_big_uint(value)),
            );
        }
        obj.insert(
            "data".into(),
            serde_json::Value::String(append_0x(&hex::encode(&self.data))),
        );
        if let Some(gas) = self.gas {
            obj.insert("gas".into(), serde_json::Value::String(encode_u64(gas)));
        }
        if let Some(price) = &self.gas_price {
            obj.insert(
                "gasPrice".into(),
                serde_json::Value::String(encode_big_uint(price)),
            );
        }
        serde_json::Value::Object(obj)
    }
}

// ---------------------------------------------------------------------------
// Watch-set surface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTargetType {
    AccountAddress,
    ContractAddress,
}

#[derive(Debug, Clone)]
pub struct ScanTargetParam {
    pub scan_target: String,
    pub symbol: String,
    pub target_type: ScanTargetType,
}

#[derive(Debug, Clone, Default)]
pub struct ScanTargetResult {
    pub source_key: String,
    pub exist: bool,
    pub target_info: Option<SmartContract>,
}

impl ScanTargetResult {
    pub fn not_found() -> Self {
        Self::default()
    }
}

/// Caller-supplied watch function; must be side-effect-free.
pub type ScanTargetFn =
    std::sync::Arc<dyn Fn(ScanTargetParam) -> ScanTargetResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceType {
    Erc20,
    Erc721,
    Erc1155,
    Unknown,
}

impl InterfaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::Erc20 => "erc20",
            InterfaceType::Erc721 => "erc721",
            InterfaceType::Erc1155 => "erc1155",
            InterfaceType::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmartContract {
    pub contract_id: String,
    pub symbol: String,
    pub address: String,
    pub token: String,
    pub name: String,
    pub protocol: String,
    pub decimals: u32,
    pub abi_json: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Coin {
    pub symbol: String,
    pub is_contract: bool,
    pub contract_id: String,
    pub contract: Option<SmartContract>,
}

impl Coin {
    pub fn native(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..Self::default()
        }
    }

    pub fn contract(symbol: &str, address: &str) -> Self {
        let contract_id = gen_contract_id(symbol, address);
        Self {
            symbol: symbol.to_string(),
            is_contract: true,
            contract_id: contract_id.clone(),
            contract: Some(SmartContract {
                contract_id,
                symbol: symbol.to_string(),
                address: normalize_address(address),
                ..SmartContract::default()
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction outputs
// ---------------------------------------------------------------------------

/// One extracted transfer leg, input or output side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recharge {
    pub sid: String,
    pub tx_id: String,
    pub address: String,
    pub amount: String,
    pub coin: Coin,
    pub index: u64,
    pub block_hash: String,
    pub block_height: u64,
    pub tx_type: u64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub tx_id: String,
    pub coin: Coin,
    pub block_hash: String,
    pub block_height: u64,
    pub amount: String,
    pub fees: String,
    pub confirm_time: i64,
    pub submit_time: i64,
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub status: String,
    pub reason: String,
    pub tx_type: u64,
    pub decimals: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxExtractData {
    pub tx_inputs: Vec<Recharge>,
    pub tx_outputs: Vec<Recharge>,
    pub transaction: TransactionRecord,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmartContractEvent {
    pub contract: SmartContract,
    pub event: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmartContractReceipt {
    pub coin: Coin,
    pub tx_id: String,
    pub from: String,
    pub to: String,
    pub value: String,
    pub fees: String,
    pub raw_receipt: String,
    pub events: Vec<SmartContractEvent>,
    pub block_hash: String,
    pub block_height: u64,
    pub confirm_time: i64,
    pub status: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Balances & journal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balance {
    pub symbol: String,
    pub address: String,
    pub balance: String,
    pub confirm_balance: String,
    pub unconfirm_balance: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenBalance {
    pub contract: SmartContract,
    pub balance: Balance,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnscanRecord {
    pub block_height: u64,
    pub tx_id: String,
    pub reason: String,
    pub symbol: String,
}

impl UnscanRecord {
    pub fn new(block_height: u64, tx_id: &str, reason: &str, symbol: &str) -> Self {
        Self {
            block_height,
            tx_id: tx_id.to_string(),
            reason: reason.to_string(),
            symbol: symbol.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceTag {
    Latest,
    Pending,
}

impl BalanceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceTag::Latest => "latest",
            BalanceTag::Pending => "pending",
        }
    }
}
