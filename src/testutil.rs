//! Configurable in-memory chain for unit tests.

use crate::error::{Result, RpcError};
use crate::node::ChainApi;
use crate::types::{
    BalanceTag, BlockTransaction, CallMsg, EthBlock, SyncStatus, TransactionReceipt,
};
use alloy::primitives::U256;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MockChain {
    pub head: AtomicU64,
    pub chain_id: u64,
    pub blocks: Mutex<BTreeMap<u64, EthBlock>>,
    pub txs: Mutex<BTreeMap<String, BlockTransaction>>,
    pub receipts: Mutex<BTreeMap<String, TransactionReceipt>>,
    /// Keyed by `(address, tag)`.
    pub balances: Mutex<BTreeMap<(String, String), U256>>,
    pub tx_counts: Mutex<BTreeMap<String, u64>>,
    pub gas_price: Mutex<U256>,
    pub gas_estimate: Mutex<U256>,
    /// `eth_call` results keyed by call-data hex: full data first, then the
    /// 4-byte selector.
    pub call_results: Mutex<BTreeMap<String, String>>,
    pub sent_raw: Mutex<Vec<String>>,
    pub fail_send: AtomicBool,
    pub fail_tx_count: AtomicBool,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            gas_price: Mutex::new(U256::from(1_000_000_000u64)),
            gas_estimate: Mutex::new(U256::from(21_000u64)),
            chain_id: 10,
            ..Self::default()
        }
    }

    pub fn set_balance(&self, address: &str, tag: BalanceTag, value: U256) {
        self.balances.lock().unwrap().insert(
            (address.to_ascii_lowercase(), tag.as_str().to_string()),
            value,
        );
    }

    pub fn set_tx_count(&self, address: &str, count: u64) {
        self.tx_counts
            .lock()
            .unwrap()
            .insert(address.to_ascii_lowercase(), count);
    }

    pub fn set_call_result(&self, selector_hex: &str, result: &str) {
        self.call_results
            .lock()
            .unwrap()
            .insert(selector_hex.to_string(), result.to_string());
    }

    pub fn put_block(&self, block: EthBlock) {
        self.blocks
            .lock()
            .unwrap()
            .insert(block.header.block_height, block);
    }
}

#[async_trait::async_trait]
impl ChainApi for MockChain {
    async fn block_number(&self) -> Result<u64> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn block_by_number(&self, height: u64, _full_tx: bool) -> Result<EthBlock> {
        self.blocks
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .ok_or_else(|| RpcError::EmptyResponse.into())
    }

    async fn transaction_by_hash(&self, txid: &str) -> Result<BlockTransaction> {
        self.txs
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or_else(|| RpcError::EmptyResponse.into())
    }

    async fn transaction_receipt(&self, txid: &str) -> Result<TransactionReceipt> {
        self.receipts
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or_else(|| RpcError::EmptyResponse.into())
    }

    async fn transaction_count(&self, addr: &str) -> Result<u64> {
        if self.fail_tx_count.load(Ordering::SeqCst) {
            return Err(RpcError::Transport("tx count unavailable".into()).into());
        }
        Ok(self
            .tx_counts
            .lock()
            .unwrap()
            .get(&addr.to_ascii_lowercase())
            .copied()
            .unwrap_or(0))
    }

    async fn balance(&self, addr: &str, tag: BalanceTag) -> Result<U256> {
        let key = (addr.to_ascii_lowercase(), tag.as_str().to_string());
        let balances = self.balances.lock().unwrap();
        if let Some(value) = balances.get(&key) {
            return Ok(*value);
        }
        // Fall back to the latest-tag value so tests only set one entry.
        if tag == BalanceTag::Pending {
            let latest = (key.0.clone(), BalanceTag::Latest.as_str().to_string());
            if let Some(value) = balances.get(&latest) {
                return Ok(*value);
            }
        }
        Ok(U256::ZERO)
    }

    async fn estimate_gas(&self, _call: &CallMsg) -> Result<U256> {
        Ok(*self.gas_estimate.lock().unwrap())
    }

    async fn gas_price(&self) -> Result<U256> {
        Ok(*self.gas_price.lock().unwrap())
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain_id)
    }

    async fn eth_call(&self, call: &CallMsg, _tag: &str) -> Result<String> {
        if call.data.len() < 4 {
            return Err(RpcError::EmptyResponse.into());
        }
        let results = self.call_results.lock().unwrap();
        let full = hex::encode(&call.data);
        if let Some(result) = results.get(&full) {
            return Ok(result.clone());
        }
        let selector = hex::encode(&call.data[..4]);
        results
            .get(&selector)
            .cloned()
            .ok_or_else(|| RpcError::EmptyResponse.into())
    }

    async fn send_raw_transaction(&self, signed_hex: &str) -> Result<String> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(RpcError::Node {
                code: -32000,
                message: "insufficient funds for gas * price + value".into(),
            }
            .into());
        }
        let mut sent = self.sent_raw.lock().unwrap();
        sent.push(signed_hex.to_string());
        Ok(format!("0x{:064x}", sent.len()))
    }

    async fn code_at(&self, _addr: &str) -> Result<String> {
        Ok("0x".to_string())
    }

    async fn syncing_status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus::default())
    }
}
