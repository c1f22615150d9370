//! Typed wrappers over the node's JSON-RPC surface.
//!
//! `ChainApi` is the seam the scanner and builder depend on; `EthNode` is
//! the production implementation over [`RpcClient`]. Tests drive the higher
//! layers through mock `ChainApi` implementations.

use crate::address::AddressCodec;
use crate::config::WalletConfig;
use crate::error::{Result, RpcError};
use crate::rpc::RpcClient;
use crate::types::{
    append_0x, encode_u64, parse_big_uint, parse_u64, BalanceTag, BlockTransaction, CallMsg,
    EthBlock, SyncStatus, TransactionReceipt,
};
use alloy::primitives::U256;
use async_trait::async_trait;
use serde_json::{json, Value};

#[async_trait]
pub trait ChainApi: Send + Sync {
    async fn block_number(&self) -> Result<u64>;
    async fn block_by_number(&self, height: u64, full_tx: bool) -> Result<EthBlock>;
    async fn transaction_by_hash(&self, txid: &str) -> Result<BlockTransaction>;
    async fn transaction_receipt(&self, txid: &str) -> Result<TransactionReceipt>;
    async fn transaction_count(&self, addr: &str) -> Result<u64>;
    async fn balance(&self, addr: &str, tag: BalanceTag) -> Result<U256>;
    async fn estimate_gas(&self, call: &CallMsg) -> Result<U256>;
    async fn gas_price(&self) -> Result<U256>;
    async fn chain_id(&self) -> Result<u64>;
    async fn eth_call(&self, call: &CallMsg, tag: &str) -> Result<String>;
    async fn send_raw_transaction(&self, signed_hex: &str) -> Result<String>;
    async fn code_at(&self, addr: &str) -> Result<String>;
    async fn syncing_status(&self) -> Result<SyncStatus>;

    /// Single-flight token metadata (name, symbol, decimals); `None` when the
    /// node does not offer the extension.
    async fn token_metadata(&self, _contract: &str) -> Result<Option<(String, String, u8)>> {
        Ok(None)
    }
}

pub struct EthNode {
    rpc: RpcClient,
    codec: AddressCodec,
    decimals: u32,
    use_single_flight: bool,
}

impl EthNode {
    pub fn new(config: &WalletConfig, codec: AddressCodec) -> Result<Self> {
        let rpc = RpcClient::new(&config.server_api, config.broadcast_api.as_deref())?;
        Ok(Self {
            rpc,
            codec,
            decimals: config.decimals,
            use_single_flight: config.use_single_flight_rpc,
        })
    }

    async fn call_string(&self, method: &str, params: Value) -> Result<String> {
        let result = self.rpc.call(method, params).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::Decode(format!("{method} result is not a string")).into())
    }

    async fn call_u64(&self, method: &str, params: Value) -> Result<u64> {
        let raw = self.call_string(method, params).await?;
        parse_u64(&raw)
            .ok_or_else(|| RpcError::Decode(format!("{method} result `{raw}` is not a u64")).into())
    }

    async fn call_u256(&self, method: &str, params: Value) -> Result<U256> {
        let raw = self.call_string(method, params).await?;
        parse_big_uint(&raw).ok_or_else(|| {
            RpcError::Decode(format!("{method} result `{raw}` is not an integer")).into()
        })
    }

    fn decode_block(&self, result: &Value, full_tx: bool) -> Result<EthBlock> {
        let mut block: EthBlock = if full_tx {
            serde_json::from_value(result.clone())
                .map_err(|err| RpcError::Decode(format!("block decode failed: {err}")))?
        } else {
            // Without full transactions the `transactions` field is a hash
            // list; decode the header alone.
            let header = serde_json::from_value(result.clone())
                .map_err(|err| RpcError::Decode(format!("block header decode failed: {err}")))?;
            EthBlock {
                header,
                transactions: Vec::new(),
            }
        };
        block.header.block_height = parse_u64(&block.header.block_number).ok_or_else(|| {
            RpcError::Decode(format!(
                "block number `{}` is not a u64",
                block.header.block_number
            ))
        })?;
        for tx in &mut block.transactions {
            tx.block_height = block.header.block_height;
            tx.decimals = self.decimals;
            tx.from = self.codec.encode(&tx.from);
            tx.to = tx.to.as_deref().map(|to| self.codec.encode(to));
        }
        Ok(block)
    }

    /// True when the address carries deployed code.
    pub async fn is_contract(&self, addr: &str) -> Result<bool> {
        let code = self.code_at(addr).await?;
        Ok(code != "0x" && !code.is_empty())
    }

    /// `qn_getBlockWithReceipts`: block plus every receipt in one call, so
    /// extraction needs no per-transaction receipt fetch.
    async fn block_with_receipts(&self, height: u64) -> Result<EthBlock> {
        let result = self
            .rpc
            .call("qn_getBlockWithReceipts", json!([encode_u64(height)]))
            .await?;
        let block_value = result
            .get("block")
            .ok_or_else(|| RpcError::Decode("single-flight result lacks `block`".to_string()))?;
        let mut block = self.decode_block(block_value, true)?;

        let mut receipts = std::collections::BTreeMap::new();
        if let Some(list) = result.get("receipts").and_then(Value::as_array) {
            for raw in list {
                let receipt = TransactionReceipt::from_raw_json(&raw.to_string())
                    .ok_or_else(|| RpcError::Decode("receipt decode failed".to_string()))?;
                receipts.insert(receipt.receipt.tx_hash.to_ascii_lowercase(), receipt);
            }
        }
        for tx in &mut block.transactions {
            if let Some(receipt) = receipts.get(&tx.hash.to_ascii_lowercase()) {
                tx.gas = receipt.receipt.gas_used.clone();
                tx.status = receipt.status_u64();
                tx.receipt = Some(receipt.clone());
            }
        }
        Ok(block)
    }
}

#[async_trait]
impl ChainApi for EthNode {
    async fn block_number(&self) -> Result<u64> {
        self.call_u64("eth_blockNumber", json!([])).await
    }

    async fn block_by_number(&self, height: u64, full_tx: bool) -> Result<EthBlock> {
        if self.use_single_flight && full_tx {
            return self.block_with_receipts(height).await;
        }
        let result = self
            .rpc
            .call("eth_getBlockByNumber", json!([encode_u64(height), full_tx]))
            .await?;
        self.decode_block(&result, full_tx)
    }

    async fn transaction_by_hash(&self, txid: &str) -> Result<BlockTransaction> {
        let result = self
            .rpc
            .call("eth_getTransactionByHash", json!([append_0x(txid)]))
            .await?;
        let mut tx: BlockTransaction = serde_json::from_value(result)
            .map_err(|err| RpcError::Decode(format!("transaction decode failed: {err}")))?;
        tx.block_height = parse_u64(&tx.block_number).unwrap_or(0);
        tx.decimals = self.decimals;
        tx.from = self.codec.encode(&tx.from);
        tx.to = tx.to.as_deref().map(|to| self.codec.encode(to));
        Ok(tx)
    }

    async fn transaction_receipt(&self, txid: &str) -> Result<TransactionReceipt> {
        let result = self
            .rpc
            .call("eth_getTransactionReceipt", json!([append_0x(txid)]))
            .await?;
        TransactionReceipt::from_raw_json(&result.to_string())
            .ok_or_else(|| RpcError::Decode("receipt decode failed".to_string()).into())
    }

    async fn transaction_count(&self, addr: &str) -> Result<u64> {
        let addr = self.codec.decode(addr);
        self.call_u64(
            "eth_getTransactionCount",
            json!([append_0x(&addr), "latest"]),
        )
        .await
    }

    async fn balance(&self, addr: &str, tag: BalanceTag) -> Result<U256> {
        let addr = self.codec.decode(addr);
        self.call_u256("eth_getBalance", json!([append_0x(&addr), tag.as_str()]))
            .await
    }

    async fn estimate_gas(&self, call: &CallMsg) -> Result<U256> {
        let mut obj = serde_json::Map::new();
        obj.insert(
            "from".into(),
            Value::String(self.codec.decode(&call.from)),
        );
        obj.insert("to".into(), Value::String(self.codec.decode(&call.to)));
        obj.insert(
            "data".into(),
            Value::String(append_0x(&hex::encode(&call.data))),
        );
        if let Some(value) = &call.value {
            obj.insert("value".into(), Value::String(format!("0x{value:x}")));
        }
        let estimated = self
            .call_u256("eth_estimateGas", json!([Value::Object(obj)]))
            .await?;
        // Contract calls get a 10% margin so the limit survives state drift
        // between estimation and inclusion.
        if call.data.is_empty() {
            Ok(estimated)
        } else {
            Ok(estimated * U256::from(110u64) / U256::from(100u64))
        }
    }

    async fn gas_price(&self) -> Result<U256> {
        self.call_u256("eth_gasPrice", json!([])).await
    }

    async fn chain_id(&self) -> Result<u64> {
        self.call_u64("eth_chainId", json!([])).await
    }

    async fn eth_call(&self, call: &CallMsg, tag: &str) -> Result<String> {
        self.call_string("eth_call", json!([call.to_call_object(), tag]))
            .await
    }

    async fn send_raw_transaction(&self, signed_hex: &str) -> Result<String> {
        self.call_string("eth_sendRawTransaction", json!([append_0x(signed_hex)]))
            .await
    }

    async fn code_at(&self, addr: &str) -> Result<String> {
        let addr = self.codec.decode(addr);
        self.call_string("eth_getCode", json!([append_0x(&addr), "latest"]))
            .await
    }

    async fn syncing_status(&self) -> Result<SyncStatus> {
        let result = self.rpc.call("eth_syncing", json!([])).await;
        match result {
            Ok(Value::Object(obj)) => Ok(SyncStatus {
                syncing: true,
                current_block_height: obj
                    .get("currentBlock")
                    .and_then(Value::as_str)
                    .and_then(parse_u64)
                    .unwrap_or(0),
                network_block_height: obj
                    .get("highestBlock")
                    .and_then(Value::as_str)
                    .and_then(parse_u64)
                    .unwrap_or(0),
            }),
            Ok(_) => Ok(SyncStatus::default()),
            Err(err) => Err(err),
        }
    }

    async fn token_metadata(&self, contract: &str) -> Result<Option<(String, String, u8)>> {
        if !self.use_single_flight {
            return Ok(None);
        }
        let result = self
            .rpc
            .call(
                "qn_getTokenMetadataByContractAddress",
                json!([{ "contract": contract }]),
            )
            .await?;
        let name = result
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let symbol = result
            .get("symbol")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let decimals = result
            .get("decimals")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u8;
        Ok(Some((name, symbol, decimals)))
    }
}
