//! Turns one transaction + receipt into per-watcher transfer records and
//! per-contract event records.
//!
//! Stateless per call: the watch function is injected, the node is only used
//! to fetch a missing receipt. Log-level decode failures are skipped so a
//! contract upgrade cannot wedge the scanner; receipt-level failures fail
//! the extraction and get journaled by the caller.

use crate::abi;
use crate::node::ChainApi;
use crate::types::{
    amount_to_decimal_string, gen_tx_input_sid, gen_tx_output_sid, normalize_address, now_unix,
    parse_big_uint, BlockTransaction, Coin, Recharge, ScanTargetFn, ScanTargetParam,
    ScanTargetResult, ScanTargetType, SmartContractEvent, SmartContractReceipt, TransactionRecord,
    TransferEvent, TxExtractData,
};
use alloy::primitives::U256;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct ExtractResult {
    pub extract_data: BTreeMap<String, Vec<TxExtractData>>,
    pub extract_contract_data: BTreeMap<String, SmartContractReceipt>,
    pub tx_id: String,
    pub block_height: u64,
    pub success: bool,
}

/// Extract one transaction against the caller's watch set.
pub async fn extract_transaction<C: ChainApi + ?Sized>(
    node: &C,
    symbol: &str,
    decimals: u32,
    mut tx: BlockTransaction,
    watch: &ScanTargetFn,
) -> ExtractResult {
    let mut result = ExtractResult {
        tx_id: tx.hash.clone(),
        block_height: tx.block_height,
        success: true,
        ..ExtractResult::default()
    };

    // A pending transaction leaked through; nothing to extract.
    if tx.block_number.is_empty() {
        result.success = false;
        return result;
    }

    if let Err(err) = update_tx_by_receipt(node, decimals, &mut tx).await {
        tracing::error!(tx_id = %tx.hash, error = %err, "get transaction receipt failed");
        result.success = false;
        return result;
    }

    extract_base_transaction(symbol, decimals, &tx, watch, &mut result);
    extract_smart_contract_transaction(symbol, &tx, watch, &mut result);

    result
}

/// Attach the receipt, actual gas used and status to the transaction.
///
/// The single-flight block fetch pre-populates the receipt; only fetch when
/// it is missing.
async fn update_tx_by_receipt<C: ChainApi + ?Sized>(
    node: &C,
    decimals: u32,
    tx: &mut BlockTransaction,
) -> crate::error::Result<()> {
    if tx.block_height == 0 || tx.block_hash.is_empty() {
        return Ok(());
    }
    if tx.receipt.is_none() {
        let receipt = node.transaction_receipt(&tx.hash).await?;
        tx.gas = receipt.receipt.gas_used.clone();
        tx.status = receipt.status_u64();
        tx.receipt = Some(receipt);
    }
    tx.decimals = decimals;
    Ok(())
}

fn watch_lookup(
    watch: &ScanTargetFn,
    symbol: &str,
    target: &str,
    target_type: ScanTargetType,
) -> ScanTargetResult {
    watch(ScanTargetParam {
        scan_target: normalize_address(target),
        symbol: symbol.to_string(),
        target_type,
    })
}

/// Base-coin leg plus the token legs derived from ERC-20 Transfer logs.
fn extract_base_transaction(
    symbol: &str,
    decimals: u32,
    tx: &BlockTransaction,
    watch: &ScanTargetFn,
    result: &mut ExtractResult,
) {
    let Some(receipt) = &tx.receipt else {
        result.success = false;
        return;
    };
    let token_events = receipt.parse_transfer_events();
    let is_token_transfer = !token_events.is_empty();

    for (source_key, data) in extract_eth_transaction(symbol, decimals, tx, is_token_transfer, watch)
    {
        result.extract_data.entry(source_key).or_default().push(data);
    }

    for (contract_address, events) in &token_events {
        for (source_key, data) in
            extract_erc20_transaction(symbol, tx, contract_address, events, watch)
        {
            result.extract_data.entry(source_key).or_default().push(data);
        }
    }
}

/// Native-coin transfer records for watched from/to account addresses.
///
/// When the receipt also carries token transfers the native leg is tagged
/// `tx_type = 1` so the platform can tell the value-bearing move apart.
fn extract_eth_transaction(
    symbol: &str,
    decimals: u32,
    tx: &BlockTransaction,
    is_token_transfer: bool,
    watch: &ScanTargetFn,
) -> BTreeMap<String, TxExtractData> {
    let mut extract_map: BTreeMap<String, TxExtractData> = BTreeMap::new();
    let from = tx.from.clone();
    let to = tx.to_address();
    let tx_type = u64::from(is_token_transfer);
    let created_at = now_unix();
    let coin = Coin::native(symbol);
    let amount = tx.amount_string();
    let fees = tx.fee_string();

    let from_result = watch_lookup(watch, symbol, &from, ScanTargetType::AccountAddress);
    if from_result.exist {
        let entry = extract_map.entry(from_result.source_key).or_default();
        entry.tx_inputs.push(Recharge {
            sid: gen_tx_input_sid(&tx.hash, symbol, "", 0),
            tx_id: tx.hash.clone(),
            address: from.clone(),
            amount: amount.clone(),
            coin: coin.clone(),
            index: 0,
            block_hash: tx.block_hash.clone(),
            block_height: tx.block_height,
            tx_type,
            created_at,
        });
        // The fee travels as a second input leg.
        entry.tx_inputs.push(Recharge {
            sid: gen_tx_input_sid(&tx.hash, symbol, "", 1),
            tx_id: tx.hash.clone(),
            address: from.clone(),
            amount: fees.clone(),
            coin: coin.clone(),
            index: 1,
            block_hash: tx.block_hash.clone(),
            block_height: tx.block_height,
            tx_type,
            created_at,
        });
    }

    if !to.is_empty() {
        let to_result = watch_lookup(watch, symbol, &to, ScanTargetType::AccountAddress);
        if to_result.exist {
            let entry = extract_map.entry(to_result.source_key).or_default();
            entry.tx_outputs.push(Recharge {
                sid: gen_tx_output_sid(&tx.hash, symbol, "", 0),
                tx_id: tx.hash.clone(),
                address: to.clone(),
                amount: amount.clone(),
                coin: coin.clone(),
                index: 0,
                block_hash: tx.block_hash.clone(),
                block_height: tx.block_height,
                tx_type,
                created_at,
            });
        }
    }

    for data in extract_map.values_mut() {
        data.transaction = TransactionRecord {
            tx_id: tx.hash.clone(),
            coin: coin.clone(),
            block_hash: tx.block_hash.clone(),
            block_height: tx.block_height,
            amount: amount.clone(),
            fees: fees.clone(),
            confirm_time: created_at,
            submit_time: 0,
            from: vec![format!("{from}:{amount}")],
            to: vec![format!("{to}:{amount}")],
            status: tx.status.to_string(),
            reason: String::new(),
            tx_type,
            decimals,
        };
    }
    extract_map
}

/// Token transfer records for one contract's Transfer events.
fn extract_erc20_transaction(
    symbol: &str,
    tx: &BlockTransaction,
    contract_address: &str,
    events: &[TransferEvent],
    watch: &ScanTargetFn,
) -> BTreeMap<String, TxExtractData> {
    let mut extract_map: BTreeMap<String, TxExtractData> = BTreeMap::new();
    let coin = Coin::contract(symbol, contract_address);
    let created_at = now_unix();

    let from_summary = extract_erc20_detail(symbol, tx, &coin, events, true, created_at, watch, &mut extract_map);
    let to_summary = extract_erc20_detail(symbol, tx, &coin, events, false, created_at, watch, &mut extract_map);

    for data in extract_map.values_mut() {
        data.transaction = TransactionRecord {
            tx_id: tx.hash.clone(),
            coin: coin.clone(),
            block_hash: tx.block_hash.clone(),
            block_height: tx.block_height,
            amount: "0".to_string(),
            fees: "0".to_string(),
            confirm_time: created_at,
            submit_time: 0,
            from: from_summary.clone(),
            to: to_summary.clone(),
            status: tx.status.to_string(),
            reason: String::new(),
            tx_type: 0,
            decimals: 0,
        };
    }
    extract_map
}

#[allow(clippy::too_many_arguments)]
fn extract_erc20_detail(
    symbol: &str,
    tx: &BlockTransaction,
    coin: &Coin,
    events: &[TransferEvent],
    is_input: bool,
    created_at: i64,
    watch: &ScanTargetFn,
    extract_map: &mut BTreeMap<String, TxExtractData>,
) -> Vec<String> {
    let mut summary = Vec::with_capacity(events.len());
    for (i, event) in events.iter().enumerate() {
        let address = if is_input { &event.from } else { &event.to };
        summary.push(format!("{address}:{}", event.value));

        let target = watch_lookup(watch, symbol, address, ScanTargetType::AccountAddress);
        if !target.exist {
            continue;
        }
        let index = i as u64;
        let sid = if is_input {
            gen_tx_input_sid(&tx.hash, symbol, &coin.contract_id, index)
        } else {
            gen_tx_output_sid(&tx.hash, symbol, &coin.contract_id, index)
        };
        let detail = Recharge {
            sid,
            tx_id: tx.hash.clone(),
            address: address.clone(),
            amount: event.value.to_string(),
            coin: coin.clone(),
            index,
            block_hash: tx.block_hash.clone(),
            block_height: tx.block_height,
            tx_type: 0,
            created_at,
        };
        let entry = extract_map.entry(target.source_key).or_default();
        if is_input {
            entry.tx_inputs.push(detail);
        } else {
            entry.tx_outputs.push(detail);
        }
    }
    summary
}

/// Contract leg: decode every watched contract's logs against its ABI.
fn extract_smart_contract_transaction(
    symbol: &str,
    tx: &BlockTransaction,
    watch: &ScanTargetFn,
    result: &mut ExtractResult,
) {
    let contract_address = normalize_address(&tx.to_address());
    if contract_address == "0x" {
        return;
    }

    let target = watch_lookup(watch, symbol, &contract_address, ScanTargetType::ContractAddress);
    if !target.exist {
        return;
    }
    let Some(contract) = target.target_info else {
        result.success = false;
        return;
    };

    let coin = Coin {
        symbol: symbol.to_string(),
        is_contract: true,
        contract_id: contract.contract_id.clone(),
        contract: Some(contract.clone()),
    };

    let Some(receipt) = &tx.receipt else {
        result.success = false;
        return;
    };

    let created_at = now_unix();
    let mut events = Vec::new();
    for log in &receipt.receipt.logs {
        let log_address = normalize_address(&log.address);
        let log_target =
            watch_lookup(watch, symbol, &log_address, ScanTargetType::ContractAddress);
        if !log_target.exist {
            continue;
        }
        let Some(log_contract) = log_target.target_info else {
            tracing::error!(address = %log_address, "watched contract lookup returned no contract info");
            result.success = false;
            return;
        };
        let abi_instance = match abi::parse_abi_json(&log_contract.abi_json) {
            Ok(instance) => instance,
            Err(err) => {
                tracing::error!(address = %log_address, error = %err, "abi decode json failed");
                result.success = false;
                return;
            }
        };
        // Logs the ABI does not know are skipped, not failed: contracts get
        // upgraded under watchers.
        let (_, event_name, value_json) = match abi::decode_receipt_log(&abi_instance, log) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::debug!(address = %log_address, error = %err, "receipt log decode skipped");
                continue;
            }
        };
        events.push(SmartContractEvent {
            contract: log_contract,
            event: event_name,
            value: value_json,
        });
    }

    let contract_receipt = SmartContractReceipt {
        coin,
        tx_id: tx.hash.clone(),
        from: tx.from.clone(),
        to: contract_address,
        value: amount_to_decimal_string(
            &parse_big_uint(&tx.value).unwrap_or(U256::ZERO),
            tx.decimals,
        ),
        fees: String::new(),
        raw_receipt: receipt.raw.clone(),
        events,
        block_hash: tx.block_hash.clone(),
        block_height: tx.block_height,
        confirm_time: created_at,
        status: tx.status.to_string(),
        reason: String::new(),
    };

    result
        .extract_contract_data
        .insert(target.source_key, contract_receipt);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EthLog, EthReceipt, TransactionReceipt};
    use std::sync::Arc;

    struct NoChain;

    #[async_trait::async_trait]
    impl ChainApi for NoChain {
        async fn block_number(&self) -> crate::error::Result<u64> {
            unreachable!("extractor tests pre-attach receipts")
        }
        async fn block_by_number(
            &self,
            _: u64,
            _: bool,
        ) -> crate::error::Result<crate::types::EthBlock> {
            unreachable!()
        }
        async fn transaction_by_hash(
            &self,
            _: &str,
        ) -> crate::error::Result<BlockTransaction> {
            unreachable!()
        }
        async fn transaction_receipt(
            &self,
            _: &str,
        ) -> crate::error::Result<TransactionReceipt> {
            Err(crate::error::RpcError::EmptyResponse.into())
        }
        async fn transaction_count(&self, _: &str) -> crate::error::Result<u64> {
            unreachable!()
        }
        async fn balance(
            &self,
            _: &str,
            _: crate::types::BalanceTag,
        ) -> crate::error::Result<alloy::primitives::U256> {
            unreachable!()
        }
        async fn estimate_gas(
            &self,
            _: &crate::types::CallMsg,
        ) -> crate::error::Result<alloy::primitives::U256> {
            unreachable!()
        }
        async fn gas_price(&self) -> crate::error::Result<alloy::primitives::U256> {
            unreachable!()
        }
        async fn chain_id(&self) -> crate::error::Result<u64> {
            unreachable!()
        }
        async fn eth_call(
            &self,
            _: &crate::types::CallMsg,
            _: &str,
        ) -> crate::error::Result<String> {
            unreachable!()
        }
        async fn send_raw_transaction(&self, _: &str) -> crate::error::Result<String> {
            unreachable!()
        }
        async fn code_at(&self, _: &str) -> crate::error::Result<String> {
            unreachable!()
        }
        async fn syncing_status(&self) -> crate::error::Result<crate::types::SyncStatus> {
            unreachable!()
        }
    }

    fn native_tx(receipt_logs: Vec<EthLog>) -> BlockTransaction {
        let receipt = EthReceipt {
            tx_hash: "0x01".into(),
            status: "0x1".into(),
            gas_used: "0x5208".into(),
            cumulative_gas_used: "0x5208".into(),
            contract_address: None,
            logs: receipt_logs,
        };
        BlockTransaction {
            hash: "0x01".into(),
            block_number: "0x64".into(),
            block_hash: "0xaa".into(),
            from: "0xffffffffffffffffffffffffffffffffffffffff".into(),
            to: Some("0x3440f720862aa7dfd4f86ecc78542b3ded900c02".into()),
            gas: "0x5208".into(),
            gas_price: "0x3b9aca00".into(),
            value: "0x1".into(),
            data: "0x".into(),
            nonce: "0x0".into(),
            tx_index: "0x0".into(),
            block_height: 100,
            status: 1,
            receipt: Some(TransactionReceipt {
                raw: serde_json::to_string(&receipt).unwrap(),
                receipt,
            }),
            decimals: 18,
        }
    }

    fn watch_recv() -> ScanTargetFn {
        Arc::new(|param: ScanTargetParam| {
            if param.target_type == ScanTargetType::AccountAddress
                && param.scan_target == "0x3440f720862aa7dfd4f86ecc78542b3ded900c02"
            {
                ScanTargetResult {
                    source_key: "recv".into(),
                    exist: true,
                    target_info: None,
                }
            } else {
                ScanTargetResult::not_found()
            }
        })
    }

    #[tokio::test]
    async fn test_native_transfer_discovery() {
        let result =
            extract_transaction(&NoChain, "QUORUM", 18, native_tx(vec![]), &watch_recv()).await;
        assert!(result.success);
        assert_eq!(result.extract_data.len(), 1);
        let data = &result.extract_data["recv"][0];
        assert_eq!(data.tx_outputs.len(), 1);
        assert_eq!(data.tx_outputs[0].amount, "0.000000000000000001");
        assert_eq!(data.tx_outputs[0].tx_type, 0);
        assert_eq!(data.transaction.block_height, 100);
    }

    #[tokio::test]
    async fn test_sender_side_emits_value_and_fee_inputs() {
        let watch: ScanTargetFn = Arc::new(|param: ScanTargetParam| {
            if param.scan_target == "0xffffffffffffffffffffffffffffffffffffffff" {
                ScanTargetResult {
                    source_key: "sender".into(),
                    exist: true,
                    target_info: None,
                }
            } else {
                ScanTargetResult::not_found()
            }
        });
        let result = extract_transaction(&NoChain, "QUORUM", 18, native_tx(vec![]), &watch).await;
        let data = &result.extract_data["sender"][0];
        assert_eq!(data.tx_inputs.len(), 2);
        assert_eq!(data.tx_inputs[0].index, 0);
        assert_eq!(data.tx_inputs[1].index, 1);
        // fee = 21000 * 1 gwei
        assert_eq!(data.tx_inputs[1].amount, "0.000021");
        assert_ne!(data.tx_inputs[0].sid, data.tx_inputs[1].sid);
    }

    #[tokio::test]
    async fn test_replay_produces_identical_sids() {
        let watch = watch_recv();
        let a = extract_transaction(&NoChain, "QUORUM", 18, native_tx(vec![]), &watch).await;
        let b = extract_transaction(&NoChain, "QUORUM", 18, native_tx(vec![]), &watch).await;
        let sid_a = &a.extract_data["recv"][0].tx_outputs[0].sid;
        let sid_b = &b.extract_data["recv"][0].tx_outputs[0].sid;
        assert_eq!(sid_a, sid_b);
    }

    #[tokio::test]
    async fn test_pending_transaction_fails_extraction() {
        let mut tx = native_tx(vec![]);
        tx.block_number = String::new();
        let result = extract_transaction(&NoChain, "QUORUM", 18, tx, &watch_recv()).await;
        assert!(!result.success);
    }

    fn transfer_log(contract: &str, from: &str, to: &str, value: u64) -> EthLog {
        EthLog {
            address: contract.into(),
            topics: vec![
                crate::types::transfer_event_topic().to_string(),
                format!("0x000000000000000000000000{}", crate::types::strip_0x(from)),
                format!("0x000000000000000000000000{}", crate::types::strip_0x(to)),
            ],
            data: format!("0x{:064x}", value),
            log_index: "0x0".into(),
            removed: false,
        }
    }

    #[tokio::test]
    async fn test_token_transfer_tags_native_leg_and_emits_token_leg() {
        let contract = "0xbff77b4e5a478b8ab92186dbb44a777d66dfa80f";
        let holder = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let recv = "3440f720862aa7dfd4f86ecc78542b3ded900c02";
        let tx = native_tx(vec![transfer_log(contract, holder, recv, 500)]);

        let watch: ScanTargetFn = Arc::new(move |param: ScanTargetParam| {
            match (param.target_type, param.scan_target.as_str()) {
                (
                    ScanTargetType::AccountAddress,
                    "0x3440f720862aa7dfd4f86ecc78542b3ded900c02",
                ) => ScanTargetResult {
                    source_key: "recv".into(),
                    exist: true,
                    target_info: None,
                },
                _ => ScanTargetResult::not_found(),
            }
        });

        let result = extract_transaction(&NoChain, "QUORUM", 18, tx, &watch).await;
        assert!(result.success);
        let datas = &result.extract_data["recv"];
        // Both the tagged native leg and the token leg land under "recv".
        assert_eq!(datas.len(), 2);
        let native = datas
            .iter()
            .find(|d| !d.transaction.coin.is_contract)
            .expect("native leg present");
        assert_eq!(native.tx_outputs[0].tx_type, 1);
        let token = datas
            .iter()
            .find(|d| d.transaction.coin.is_contract)
            .expect("token leg present");
        assert_eq!(token.tx_outputs[0].amount, "500");
        assert_eq!(token.tx_outputs[0].coin.contract_id, crate::types::gen_contract_id("QUORUM", contract));
    }

    #[tokio::test]
    async fn test_watched_contract_event_extraction() {
        let contract = "0xbff77b4e5a478b8ab92186dbb44a777d66dfa80f";
        let holder = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let recv = "3440f720862aa7dfd4f86ecc78542b3ded900c02";
        let mut tx = native_tx(vec![transfer_log(contract, holder, recv, 500)]);
        tx.to = Some(contract.to_string());

        let contract_id = crate::types::gen_contract_id("QUORUM", contract);
        let info = crate::types::SmartContract {
            contract_id: contract_id.clone(),
            symbol: "QUORUM".into(),
            address: contract.to_string(),
            abi_json: crate::abi::ERC20_ABI_JSON.to_string(),
            ..Default::default()
        };
        let watch: ScanTargetFn = Arc::new(move |param: ScanTargetParam| {
            if param.target_type == ScanTargetType::ContractAddress
                && param.scan_target == contract
            {
                ScanTargetResult {
                    source_key: info.contract_id.clone(),
                    exist: true,
                    target_info: Some(info.clone()),
                }
            } else {
                ScanTargetResult::not_found()
            }
        });

        let result = extract_transaction(&NoChain, "QUORUM", 18, tx, &watch).await;
        assert!(result.success);
        let receipt = &result.extract_contract_data[&contract_id];
        assert_eq!(receipt.events.len(), 1);
        assert_eq!(receipt.events[0].event, "Transfer");
        let value: serde_json::Value = serde_json::from_str(&receipt.events[0].value).unwrap();
        assert_eq!(value["value"], serde_json::Value::String("500".into()));
        assert_eq!(
            value["to"],
            serde_json::Value::String(format!("0x{recv}"))
        );
        assert_eq!(receipt.status, "1");
    }

    #[tokio::test]
    async fn test_unknown_log_in_watched_contract_is_skipped() {
        let contract = "0xbff77b4e5a478b8ab92186dbb44a777d66dfa80f";
        let mut log = transfer_log(contract, "aa", "bb", 1);
        log.topics[0] = format!("0x{}", hex::encode([9u8; 32]));
        let mut tx = native_tx(vec![log]);
        tx.to = Some(contract.to_string());

        let contract_id = crate::types::gen_contract_id("QUORUM", contract);
        let info = crate::types::SmartContract {
            contract_id: contract_id.clone(),
            symbol: "QUORUM".into(),
            address: contract.to_string(),
            abi_json: crate::abi::ERC20_ABI_JSON.to_string(),
            ..Default::default()
        };
        let watch: ScanTargetFn = Arc::new(move |param: ScanTargetParam| {
            if param.target_type == ScanTargetType::ContractAddress {
                ScanTargetResult {
                    source_key: info.contract_id.clone(),
                    exist: true,
                    target_info: Some(info.clone()),
                }
            } else {
                ScanTargetResult::not_found()
            }
        });

        let result = extract_transaction(&NoChain, "QUORUM", 18, tx, &watch).await;
        assert!(result.success, "unknown topic must not fail the extraction");
        assert!(result.extract_contract_data[&contract_id].events.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_target_info_fails_extraction() {
        let contract = "0xbff77b4e5a478b8ab92186dbb44a777d66dfa80f";
        let mut tx = native_tx(vec![]);
        tx.to = Some(contract.to_string());
        let watch: ScanTargetFn = Arc::new(|param: ScanTargetParam| {
            if param.target_type == ScanTargetType::ContractAddress {
                // Claims existence but carries no contract info.
                ScanTargetResult {
                    source_key: "bad".into(),
                    exist: true,
                    target_info: None,
                }
            } else {
                ScanTargetResult::not_found()
            }
        });
        let result = extract_transaction(&NoChain, "QUORUM", 18, tx, &watch).await;
        assert!(!result.success);
    }
}
