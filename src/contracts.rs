//! Smart-contract interaction: token balances, read-only ABI calls, and the
//! contract raw-transaction surface (build, submit, await the extracted
//! receipt).

use crate::abi;
use crate::address::AddressCodec;
use crate::config::WalletConfig;
use crate::error::{Result, RpcError, TxError};
use crate::node::ChainApi;
use crate::scanner::BlockScanner;
use crate::store::WalletDai;
use crate::txbuilder::{
    get_transaction_fee_estimated, parse_signature, KeySignature, NonceTracker, TxFeeInfo,
    UnsignedLegacyTx,
};
use crate::types::{
    amount_to_decimal_string, append_0x, decimal_string_to_amount, normalize_address, parse_u64,
    strip_0x, Balance, BalanceTag, CallMsg, Coin, InterfaceType, ScanTargetFn, ScanTargetResult,
    SmartContract, SmartContractReceipt, TokenBalance,
};
use alloy::consensus::SignableTransaction;
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy_rlp::{Decodable, RlpDecodable, RlpEncodable};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const TOKEN_BALANCE_FANOUT_LIMIT: usize = 20;
const AWAIT_POLL_INTERVAL_SECS: u64 = 2;
const AWAIT_DEFAULT_TIMEOUT_SECS: u64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TxRawType {
    #[default]
    Hex,
    Json,
    Base64,
}

/// Pre-encoded call message on the wire: RLP of the fields in this order.
#[derive(Debug, Clone, RlpEncodable, RlpDecodable)]
struct CallMsgRlp {
    to: Address,
    from: Address,
    nonce: u64,
    value: U256,
    gas_limit: u64,
    gas: u64,
    gas_price: U256,
    data: Bytes,
}

/// JSON form of a pre-encoded call message, hex-quantity fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CallMsgJson {
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    nonce: String,
    #[serde(default)]
    value: String,
    #[serde(default, rename = "gasLimit")]
    gas_limit: String,
    #[serde(default)]
    gas: String,
    #[serde(default, rename = "gasPrice")]
    gas_price: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmartContractRawTransaction {
    pub coin: Coin,
    pub account_id: String,
    /// method name followed by string arguments.
    pub abi_param: Vec<String>,
    /// Pre-encoded payload; when set it is decoded per `raw_type` instead of
    /// re-encoding `abi_param`.
    pub raw: String,
    pub raw_type: TxRawType,
    /// Native value attached to the call, decimal string.
    pub value: String,
    pub fee_rate: String,
    pub fees: String,
    pub signatures: Vec<KeySignature>,
    pub unsigned: Option<UnsignedLegacyTx>,
    pub await_result: bool,
    /// Seconds; 0 means the 90 s default.
    pub await_timeout: u64,
    pub tx_from: String,
    pub tx_to: String,
    pub tx_id: String,
    pub is_built: bool,
    pub is_submit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallResultStatus {
    Success,
    Fail,
}

#[derive(Debug, Clone)]
pub struct SmartContractCallResult {
    pub method: String,
    /// Decoded return values as JSON.
    pub value: String,
    pub raw_hex: String,
    pub status: CallResultStatus,
    pub exception: String,
}

/// ERC-20 `balanceOf` through `eth_call`.
pub async fn erc20_balance_of<C: ChainApi + ?Sized>(
    node: &C,
    contract_address: &str,
    address: &str,
) -> Result<U256> {
    let data = abi::encode_abi_param(abi::erc20_abi(), &["balanceOf", address])?;
    let call = CallMsg {
        from: append_0x(address),
        to: append_0x(contract_address),
        value: Some(U256::ZERO),
        data,
        ..CallMsg::default()
    };
    let result = node.eth_call(&call, "latest").await?;
    let (map, _) = abi::decode_abi_result(abi::erc20_abi(), "balanceOf", &result)?;
    map.get("")
        .and_then(|v| v.as_uint())
        .map(|(value, _)| value)
        .ok_or_else(|| crate::error::AbiError::Decode("balance is not a uint".into()).into())
}

pub struct ContractDecoder<C: ChainApi + 'static> {
    node: Arc<C>,
    config: WalletConfig,
    codec: AddressCodec,
    nonce_tracker: NonceTracker<C>,
}

impl<C: ChainApi + 'static> ContractDecoder<C> {
    pub fn new(node: Arc<C>, config: WalletConfig, codec: AddressCodec) -> Self {
        let nonce_tracker = NonceTracker::new(Arc::clone(&node), config.nonce_compute_mode);
        Self {
            node,
            config,
            codec,
            nonce_tracker,
        }
    }

    /// Token balances for a set of addresses, fanned out 20 wide. Fails when
    /// any address fails.
    pub async fn get_token_balance_by_address(
        &self,
        contract: &SmartContract,
        addresses: &[String],
    ) -> Result<Vec<TokenBalance>> {
        let semaphore = Arc::new(Semaphore::new(TOKEN_BALANCE_FANOUT_LIMIT));
        let mut handles = Vec::with_capacity(addresses.len());
        for (index, address) in addresses.iter().enumerate() {
            let node = Arc::clone(&self.node);
            let semaphore = Arc::clone(&semaphore);
            let contract = contract.clone();
            let address = address.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("token balance semaphore closed");
                let balance = erc20_balance_of(node.as_ref(), &contract.address, &address).await?;
                let scaled = amount_to_decimal_string(&balance, contract.decimals);
                Ok::<(usize, TokenBalance), crate::error::WalletError>((
                    index,
                    TokenBalance {
                        balance: Balance {
                            symbol: contract.symbol.clone(),
                            address,
                            balance: scaled.clone(),
                            confirm_balance: scaled,
                            unconfirm_balance: "0".to_string(),
                        },
                        contract,
                    },
                ))
            }));
        }

        let mut results = vec![TokenBalance::default(); addresses.len()];
        for handle in handles {
            match handle.await {
                Ok(Ok((index, balance))) => results[index] = balance,
                Ok(Err(err)) => return Err(err),
                Err(err) => {
                    return Err(RpcError::Transport(format!(
                        "token balance task join error: {err}"
                    ))
                    .into())
                }
            }
        }
        Ok(results)
    }

    /// Resolve the call message: decode a pre-encoded payload when present,
    /// otherwise ABI-encode `abi_param` against the contract's ABI.
    pub fn encode_raw_transaction_call_msg(
        &self,
        dai: &dyn WalletDai,
        raw_tx: &SmartContractRawTransaction,
    ) -> Result<(CallMsg, Option<alloy::json_abi::JsonAbi>)> {
        if !raw_tx.coin.is_contract {
            return Err(TxError::CallMsgInvalid("coin is not a contract".into()).into());
        }
        let value =
            decimal_string_to_amount(&raw_tx.value, self.config.decimals).unwrap_or(U256::ZERO);

        if !raw_tx.raw.is_empty() {
            let call = match raw_tx.raw_type {
                TxRawType::Hex => {
                    let bytes = hex::decode(strip_0x(&raw_tx.raw))
                        .map_err(|err| TxError::CallMsgInvalid(err.to_string()))?;
                    decode_call_msg_rlp(&bytes)?
                }
                TxRawType::Json => {
                    let json: CallMsgJson = serde_json::from_str(&raw_tx.raw)
                        .map_err(|err| TxError::CallMsgInvalid(err.to_string()))?;
                    call_msg_from_json(&json)?
                }
                TxRawType::Base64 => {
                    let bytes = base64::engine::general_purpose::STANDARD
                        .decode(&raw_tx.raw)
                        .map_err(|err| TxError::CallMsgInvalid(err.to_string()))?;
                    decode_call_msg_rlp(&bytes)?
                }
            };
            return Ok((call, None));
        }

        let contract = raw_tx
            .coin
            .contract
            .as_ref()
            .ok_or(TxError::MissingAbi)?;
        if contract.abi_json.is_empty() {
            return Err(TxError::CallMsgInvalid("abi json is empty".into()).into());
        }
        let abi_instance = abi::parse_abi_json(&contract.abi_json)?;
        let params: Vec<&str> = raw_tx.abi_param.iter().map(String::as_str).collect();
        let data = abi::encode_abi_param(&abi_instance, &params)?;

        let addresses = dai.get_address_list(&raw_tx.account_id)?;
        let def_address = addresses
            .first()
            .ok_or_else(|| TxError::AccountNotAddress(raw_tx.account_id.clone()))?;

        let call = CallMsg {
            from: append_0x(&self.codec.decode(def_address)),
            to: append_0x(&self.codec.decode(&contract.address)),
            value: Some(value),
            data,
            ..CallMsg::default()
        };
        Ok((call, Some(abi_instance)))
    }

    /// Read-only contract invocation through `eth_call`.
    pub async fn call_smart_contract_abi(
        &self,
        dai: &dyn WalletDai,
        raw_tx: &SmartContractRawTransaction,
    ) -> Result<SmartContractCallResult> {
        let (call_msg, abi_instance) = self.encode_raw_transaction_call_msg(dai, raw_tx)?;
        let method = raw_tx.abi_param.first().cloned().unwrap_or_default();

        let raw_result = match self.node.eth_call(&call_msg, "latest").await {
            Ok(result) => result,
            Err(err) => {
                return Ok(SmartContractCallResult {
                    method,
                    value: String::new(),
                    raw_hex: String::new(),
                    status: CallResultStatus::Fail,
                    exception: err.to_string(),
                })
            }
        };

        let value = match &abi_instance {
            Some(instance) => abi::decode_abi_result(instance, &method, &raw_result)?.1,
            None => String::new(),
        };

        Ok(SmartContractCallResult {
            method,
            value,
            raw_hex: raw_result,
            status: CallResultStatus::Success,
            exception: String::new(),
        })
    }

    /// Build the contract invocation as an unsigned EIP-155 transaction and
    /// stash the signing hash.
    pub async fn create_smart_contract_raw_transaction(
        &self,
        dai: &dyn WalletDai,
        raw_tx: &mut SmartContractRawTransaction,
    ) -> Result<()> {
        let (call_msg, _) = self.encode_raw_transaction_call_msg(dai, raw_tx)?;
        let amount = call_msg.value.unwrap_or(U256::ZERO);

        let fee = match (call_msg.gas_price, call_msg.gas) {
            (Some(gas_price), Some(gas)) if gas_price > U256::ZERO && gas > 0 => {
                let mut fee = TxFeeInfo {
                    gas_limit: U256::from(gas),
                    gas_price,
                    fee: U256::ZERO,
                };
                fee.calc_fee();
                fee
            }
            _ => {
                let mut fee = get_transaction_fee_estimated(
                    self.node.as_ref(),
                    &self.config,
                    &call_msg.from,
                    &call_msg.to,
                    Some(amount),
                    Some(&call_msg.data),
                )
                .await?;
                if !raw_tx.fee_rate.is_empty() {
                    fee.gas_price =
                        decimal_string_to_amount(&raw_tx.fee_rate, self.config.decimals)
                            .ok_or_else(|| {
                                TxError::CreateFailed(format!(
                                    "bad fee rate `{}`",
                                    raw_tx.fee_rate
                                ))
                            })?;
                    fee.calc_fee();
                }
                fee
            }
        };

        let coin_balance = self
            .node
            .balance(&call_msg.from, BalanceTag::Pending)
            .await?;
        if coin_balance < fee.fee {
            return Err(TxError::InsufficientFees {
                symbol: raw_tx.coin.symbol.clone(),
                available: amount_to_decimal_string(&coin_balance, self.config.decimals),
            }
            .into());
        }

        let from = normalize_address(&call_msg.from);
        let nonce = match call_msg.nonce {
            Some(nonce) => nonce,
            None => self.nonce_tracker.next_nonce(dai, &from).await?,
        };

        let gas_limit = u64::try_from(fee.gas_limit)
            .map_err(|_| TxError::CreateFailed("gas limit out of range".into()))?;
        let unsigned = UnsignedLegacyTx {
            nonce,
            gas_price: fee.gas_price.to_string(),
            gas_limit,
            to: call_msg.to.clone(),
            value: amount.to_string(),
            data: hex::encode(&call_msg.data),
            chain_id: self.config.chain_id,
        };
        let tx = unsigned.to_tx_legacy()?;
        let mut preimage = Vec::new();
        tx.encode_for_signing(&mut preimage);
        let message = tx.signature_hash();

        raw_tx.raw = hex::encode(&preimage);
        raw_tx.raw_type = TxRawType::Hex;
        raw_tx.unsigned = Some(unsigned);
        raw_tx.fee_rate = amount_to_decimal_string(&fee.gas_price, self.config.decimals);
        raw_tx.fees = amount_to_decimal_string(&fee.fee, self.config.decimals);
        raw_tx.tx_from = from.clone();
        raw_tx.tx_to = normalize_address(&call_msg.to);
        raw_tx.signatures = vec![KeySignature {
            ecc_type: self.config.curve_type,
            nonce: format!("0x{nonce:x}"),
            address: from,
            message: hex::encode(message),
            signature: String::new(),
        }];
        raw_tx.is_built = true;
        Ok(())
    }

    /// Recovery check of the attached signature against the signing address.
    pub fn verify_raw_transaction(&self, raw_tx: &SmartContractRawTransaction) -> Result<()> {
        let Some(keysig) = raw_tx.signatures.first() else {
            return Err(TxError::EmptySignature.into());
        };
        if keysig.signature.is_empty() {
            return Err(TxError::EmptySignature.into());
        }
        let signature = parse_signature(&keysig.signature)?;
        let hash_bytes = hex::decode(strip_0x(&keysig.message))
            .map_err(|err| TxError::SignatureInvalid(format!("bad message hex: {err}")))?;
        if hash_bytes.len() != 32 {
            return Err(
                TxError::SignatureInvalid("message is not a 32-byte hash".to_string()).into(),
            );
        }
        let recovered = signature
            .recover_address_from_prehash(&B256::from_slice(&hash_bytes))
            .map_err(|err| TxError::SignatureInvalid(err.to_string()))?;
        if normalize_address(&format!("{recovered:#x}")) != normalize_address(&keysig.address) {
            return Err(TxError::SignatureInvalid(format!(
                "recovered signer {recovered:#x} does not match {}",
                keysig.address
            ))
            .into());
        }
        Ok(())
    }

    /// Broadcast the signed invocation; optionally poll the scanner until
    /// the contract receipt is extracted or the deadline passes.
    pub async fn submit_smart_contract_raw_transaction(
        &self,
        dai: &dyn WalletDai,
        raw_tx: &mut SmartContractRawTransaction,
        scanner: Option<&BlockScanner<C>>,
    ) -> Result<SmartContractReceipt> {
        self.verify_raw_transaction(raw_tx)?;

        let keysig = raw_tx.signatures[0].clone();
        let from = raw_tx.tx_from.clone();
        let unsigned = raw_tx
            .unsigned
            .clone()
            .ok_or_else(|| TxError::SubmitFailed("transaction is not built".into()))?;
        let tx = unsigned.to_tx_legacy()?;
        let signature = parse_signature(&keysig.signature)?;
        let signed = tx.into_signed(signature);
        let encoded = signed.encoded_2718();

        let tx_id = match self
            .node
            .send_raw_transaction(&append_0x(&hex::encode(&encoded)))
            .await
        {
            Err(err) => {
                self.nonce_tracker.update_nonce(dai, &from, 0);
                return Err(TxError::SubmitFailed(err.to_string()).into());
            }
            Ok(tx_id) => tx_id,
        };
        self.nonce_tracker
            .update_nonce(dai, &from, unsigned.nonce + 1);
        raw_tx.tx_id = tx_id.clone();
        raw_tx.is_submit = true;

        let receipt = SmartContractReceipt {
            coin: raw_tx.coin.clone(),
            tx_id: tx_id.clone(),
            from: raw_tx.tx_from.clone(),
            to: raw_tx.tx_to.clone(),
            value: raw_tx.value.clone(),
            fees: raw_tx.fees.clone(),
            ..SmartContractReceipt::default()
        };

        if !raw_tx.await_result {
            return Ok(receipt);
        }
        let Some(scanner) = scanner else {
            tracing::error!("await_result requested but no block scanner is attached");
            return Ok(receipt);
        };
        let Some(contract) = raw_tx.coin.contract.clone() else {
            tracing::error!("await_result requested but the coin carries no contract");
            return Ok(receipt);
        };

        let contract_id = contract.contract_id.clone();
        let watch_address = normalize_address(&contract.address);
        let watch: ScanTargetFn = Arc::new(move |param| {
            if normalize_address(&param.scan_target) == watch_address {
                ScanTargetResult {
                    source_key: contract.contract_id.clone(),
                    exist: true,
                    target_info: Some(contract.clone()),
                }
            } else {
                ScanTargetResult::not_found()
            }
        });

        let timeout = if raw_tx.await_timeout == 0 {
            AWAIT_DEFAULT_TIMEOUT_SECS
        } else {
            raw_tx.await_timeout
        };
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout);

        while tokio::time::Instant::now() < deadline {
            match scanner
                .extract_transaction_and_receipt_data(&tx_id, watch.clone())
                .await
            {
                Ok((_, contract_data)) => {
                    if let Some(extracted) = contract_data.get(&contract_id) {
                        return Ok(extracted.clone());
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "extract transaction receipt data failed");
                    return Ok(receipt);
                }
            }
            tokio::time::sleep(Duration::from_secs(AWAIT_POLL_INTERVAL_SECS)).await;
        }

        Ok(receipt)
    }

    /// Token metadata: the single-flight RPC extension when available,
    /// best-effort `name`/`symbol`/`decimals` calls otherwise.
    pub async fn get_token_metadata(&self, contract_address: &str) -> Result<SmartContract> {
        let encoded_address = self.codec.encode(contract_address);
        let contract_id =
            crate::types::gen_contract_id(&self.config.symbol, &encoded_address);

        let (name, token, decimals) = match self.node.token_metadata(contract_address).await? {
            Some((name, symbol, decimals)) => (name, symbol, decimals as u32),
            None => {
                let name = self
                    .call_string_view(contract_address, "name")
                    .await
                    .unwrap_or_default();
                let token = self
                    .call_string_view(contract_address, "symbol")
                    .await
                    .unwrap_or_default();
                let decimals = self
                    .call_uint_view(contract_address, "decimals")
                    .await
                    .unwrap_or_default();
                (name, token, decimals)
            }
        };

        Ok(SmartContract {
            contract_id,
            symbol: self.config.symbol.clone(),
            address: encoded_address,
            token,
            name,
            protocol: InterfaceType::Erc20.as_str().to_string(),
            decimals,
            abi_json: String::new(),
        })
    }

    async fn call_string_view(&self, contract_address: &str, method: &str) -> Result<String> {
        let data = abi::encode_abi_param(abi::erc20_abi(), &[method])?;
        let call = CallMsg {
            from: "0x0000000000000000000000000000000000000000".to_string(),
            to: append_0x(contract_address),
            value: Some(U256::ZERO),
            data,
            ..CallMsg::default()
        };
        let result = self.node.eth_call(&call, "latest").await?;
        let (map, _) = abi::decode_abi_result(abi::erc20_abi(), method, &result)?;
        Ok(map
            .get("")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn call_uint_view(&self, contract_address: &str, method: &str) -> Result<u32> {
        let data = abi::encode_abi_param(abi::erc20_abi(), &[method])?;
        let call = CallMsg {
            from: "0x0000000000000000000000000000000000000000".to_string(),
            to: append_0x(contract_address),
            value: Some(U256::ZERO),
            data,
            ..CallMsg::default()
        };
        let result = self.node.eth_call(&call, "latest").await?;
        let (map, _) = abi::decode_abi_result(abi::erc20_abi(), method, &result)?;
        Ok(map
            .get("")
            .and_then(|v| v.as_uint())
            .map(|(value, _)| u32::try_from(value).unwrap_or(0))
            .unwrap_or(0))
    }
}

fn decode_call_msg_rlp(bytes: &[u8]) -> Result<CallMsg> {
    let decoded = CallMsgRlp::decode(&mut &bytes[..])
        .map_err(|err| TxError::CallMsgInvalid(err.to_string()))?;
    Ok(CallMsg {
        from: format!("{:#x}", decoded.from),
        to: format!("{:#x}", decoded.to),
        value: Some(decoded.value),
        data: decoded.data.to_vec(),
        gas: (decoded.gas > 0 || decoded.gas_limit > 0)
            .then_some(decoded.gas.max(decoded.gas_limit)),
        gas_price: (decoded.gas_price > U256::ZERO).then_some(decoded.gas_price),
        nonce: (decoded.nonce > 0).then_some(decoded.nonce),
    })
}

fn call_msg_from_json(json: &CallMsgJson) -> Result<CallMsg> {
    let data = hex::decode(strip_0x(&json.data))
        .map_err(|err| TxError::CallMsgInvalid(format!("bad data hex: {err}")))?;
    let value = if json.value.is_empty() {
        None
    } else {
        Some(
            crate::types::parse_big_uint(&json.value)
                .ok_or_else(|| TxError::CallMsgInvalid("bad value".into()))?,
        )
    };
    let gas = [&json.gas, &json.gas_limit]
        .into_iter()
        .filter_map(|raw| parse_u64(raw))
        .find(|gas| *gas > 0);
    let gas_price = if json.gas_price.is_empty() {
        None
    } else {
        crate::types::parse_big_uint(&json.gas_price)
    };
    Ok(CallMsg {
        from: json.from.clone(),
        to: json.to.clone(),
        value,
        data,
        gas,
        gas_price,
        nonce: parse_u64(&json.nonce).filter(|n| *n > 0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::store::WalletDai as _;
    use crate::testutil::MockChain;
    use alloy::signers::{local::PrivateKeySigner, SignerSync};
    use alloy_rlp::Encodable;
    use std::str::FromStr;

    fn decoder(node: Arc<MockChain>) -> ContractDecoder<MockChain> {
        let mut config = WalletConfig::new("QUORUM");
        config.chain_id = 10;
        ContractDecoder::new(node, config, AddressCodec::passthrough())
    }

    fn watched_coin(abi_json: &str) -> Coin {
        let mut coin = Coin::contract("QUORUM", "0xbff77b4e5a478b8ab92186dbb44a777d66dfa80f");
        if let Some(contract) = coin.contract.as_mut() {
            contract.abi_json = abi_json.to_string();
            contract.decimals = 2;
        }
        coin
    }

    #[tokio::test]
    async fn test_token_balance_fanout_scales_to_contract_decimals() {
        let node = Arc::new(MockChain::new());
        // balanceOf → 1234 base units
        node.set_call_result("70a08231", &format!("0x{:064x}", 1234));
        let d = decoder(Arc::clone(&node));
        let contract = watched_coin(crate::abi::ERC20_ABI_JSON)
            .contract
            .unwrap();
        let balances = d
            .get_token_balance_by_address(
                &contract,
                &["0x1111111111111111111111111111111111111111".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].balance.balance, "12.34");
    }

    #[tokio::test]
    async fn test_call_smart_contract_abi_decodes_json_value() {
        let node = Arc::new(MockChain::new());
        node.set_call_result("70a08231", &format!("0x{:064x}", 1234));
        let dai = SqliteStore::open_in_memory().unwrap();
        dai.add_account_address("acct", "0x1111111111111111111111111111111111111111")
            .unwrap();
        let d = decoder(Arc::clone(&node));
        let raw_tx = SmartContractRawTransaction {
            coin: watched_coin(crate::abi::ERC20_ABI_JSON),
            account_id: "acct".into(),
            abi_param: vec![
                "balanceOf".into(),
                "0x1111111111111111111111111111111111111111".into(),
            ],
            ..SmartContractRawTransaction::default()
        };
        let result = d.call_smart_contract_abi(&dai, &raw_tx).await.unwrap();
        assert_eq!(result.status, CallResultStatus::Success);
        assert!(result.value.contains("1234"));
    }

    #[tokio::test]
    async fn test_create_contract_raw_transaction_requires_fee_balance() {
        let node = Arc::new(MockChain::new());
        let dai = SqliteStore::open_in_memory().unwrap();
        dai.add_account_address("acct", "0x1111111111111111111111111111111111111111")
            .unwrap();
        let d = decoder(Arc::clone(&node));
        let mut raw_tx = SmartContractRawTransaction {
            coin: watched_coin(crate::abi::ERC20_ABI_JSON),
            account_id: "acct".into(),
            abi_param: vec![
                "transfer".into(),
                "0x3440f720862aa7dfd4f86ecc78542b3ded900c02".into(),
                "5".into(),
            ],
            ..SmartContractRawTransaction::default()
        };
        let err = d
            .create_smart_contract_raw_transaction(&dai, &mut raw_tx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not enough to call smart contract"));
    }

    #[tokio::test]
    async fn test_contract_build_sign_submit_round_trip() {
        let node = Arc::new(MockChain::new());
        let dai = SqliteStore::open_in_memory().unwrap();
        let signer = PrivateKeySigner::random();
        let from = format!("{:#x}", signer.address());
        dai.add_account_address("acct", &from).unwrap();
        node.set_balance(
            &from,
            BalanceTag::Latest,
            U256::from(10u64).pow(U256::from(18u64)),
        );
        node.set_tx_count(&from, 2);

        let d = decoder(Arc::clone(&node));
        let mut raw_tx = SmartContractRawTransaction {
            coin: watched_coin(crate::abi::ERC20_ABI_JSON),
            account_id: "acct".into(),
            abi_param: vec![
                "transfer".into(),
                "0x3440f720862aa7dfd4f86ecc78542b3ded900c02".into(),
                "5".into(),
            ],
            ..SmartContractRawTransaction::default()
        };
        d.create_smart_contract_raw_transaction(&dai, &mut raw_tx)
            .await
            .unwrap();
        assert!(raw_tx.is_built);
        assert_eq!(raw_tx.unsigned.as_ref().unwrap().nonce, 2);
        assert_eq!(raw_tx.unsigned.as_ref().unwrap().value, "0");

        let hash = B256::from_slice(&hex::decode(&raw_tx.signatures[0].message).unwrap());
        let signature = signer.sign_hash_sync(&hash).unwrap();
        raw_tx.signatures[0].signature = hex::encode(signature.as_bytes());

        let receipt = d
            .submit_smart_contract_raw_transaction(&dai, &mut raw_tx, None)
            .await
            .unwrap();
        assert!(raw_tx.is_submit);
        assert_eq!(receipt.tx_id, raw_tx.tx_id);
        assert_eq!(dai.get_address_nonce(&from).unwrap(), Some(3));
    }

    #[test]
    fn test_raw_payload_rlp_round_trip() {
        let original = CallMsgRlp {
            to: Address::from_str("0xbff77b4e5a478b8ab92186dbb44a777d66dfa80f").unwrap(),
            from: Address::from_str("0x1111111111111111111111111111111111111111").unwrap(),
            nonce: 4,
            value: U256::from(7u64),
            gas_limit: 60_000,
            gas: 0,
            gas_price: U256::from(2_000_000_000u64),
            data: Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]),
        };
        let mut encoded = Vec::new();
        original.encode(&mut encoded);
        let call = decode_call_msg_rlp(&encoded).unwrap();
        assert_eq!(call.to, "0xbff77b4e5a478b8ab92186dbb44a777d66dfa80f");
        assert_eq!(call.nonce, Some(4));
        assert_eq!(call.gas, Some(60_000));
        assert_eq!(call.gas_price, Some(U256::from(2_000_000_000u64)));
        assert_eq!(call.data, vec![0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_raw_payload_json_form() {
        let raw = r#"{"from":"0x1111111111111111111111111111111111111111",
                      "to":"0xbff77b4e5a478b8ab92186dbb44a777d66dfa80f",
                      "nonce":"0x4","value":"0x7","gasLimit":"0xea60",
                      "gasPrice":"0x77359400","data":"0xa9059cbb"}"#;
        let json: CallMsgJson = serde_json::from_str(raw).unwrap();
        let call = call_msg_from_json(&json).unwrap();
        assert_eq!(call.nonce, Some(4));
        assert_eq!(call.value, Some(U256::from(7u64)));
        assert_eq!(call.gas, Some(60_000));
        assert_eq!(call.data, vec![0xa9, 0x05, 0x9c, 0xbb]);
    }
}
