//! Transaction construction: fee estimation, source-address selection,
//! EIP-155 legacy build, external-signature attach and broadcast.
//!
//! The wallet platform owns the keys. Building stashes the RLP signing
//! preimage and its keccak hash; the caller signs the hash and hands back a
//! 65-byte r‖s‖v signature, which submit verifies by recovery, attaches and
//! broadcasts through the (possibly distinct) broadcast endpoint.

mod nonce;
pub mod summary;

pub use nonce::NonceTracker;
pub use summary::{FeesSupportAccount, RawTransactionWithError, SummaryRawTransaction};

use crate::address::AddressCodec;
use crate::config::WalletConfig;
use crate::contracts;
use crate::error::{Result, TxError};
use crate::node::ChainApi;
use crate::store::WalletDai;
use crate::types::{
    add_decimal_strings, amount_to_decimal_string, append_0x, decimal_string_to_amount,
    normalize_address, now_unix, parse_big_uint, strip_0x, BalanceTag, CallMsg, Coin,
    TransactionRecord,
};
use alloy::consensus::{SignableTransaction, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, Signature, TxKind, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeySignature {
    pub ecc_type: u32,
    /// Hex nonce the transaction was built with.
    pub nonce: String,
    /// Signing address.
    pub address: String,
    /// EIP-155 signing hash, hex.
    pub message: String,
    /// 65-byte r‖s‖v signature hex, filled in by the wallet.
    pub signature: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransaction {
    pub coin: Coin,
    pub account_id: String,
    /// destination → amount (decimal string); single-destination transfers
    /// read the first entry.
    pub to: BTreeMap<String, String>,
    /// Optional gas-price override, decimal string in native decimals.
    pub fee_rate: String,
    pub fees: String,
    /// RLP signing preimage, hex.
    pub raw_hex: String,
    pub signatures: Vec<KeySignature>,
    pub unsigned: Option<UnsignedLegacyTx>,
    pub is_built: bool,
    pub is_submit: bool,
    pub tx_id: String,
    pub tx_from: Vec<String>,
    pub tx_to: Vec<String>,
    pub tx_amount: String,
}

impl RawTransaction {
    pub fn new(coin: Coin, account_id: &str, to: &str, amount: &str) -> Self {
        let mut to_map = BTreeMap::new();
        to_map.insert(to.to_string(), amount.to_string());
        Self {
            coin,
            account_id: account_id.to_string(),
            to: to_map,
            ..Self::default()
        }
    }

    fn first_destination(&self) -> Result<(String, String)> {
        self.to
            .iter()
            .next()
            .map(|(to, amount)| (to.clone(), amount.clone()))
            .ok_or_else(|| TxError::CreateFailed("transaction has no destination".into()).into())
    }
}

/// Unsigned EIP-155 legacy transaction, kept alongside the raw hex so submit
/// can rebuild and sign it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnsignedLegacyTx {
    pub nonce: u64,
    /// Wei, decimal string.
    pub gas_price: String,
    pub gas_limit: u64,
    pub to: String,
    /// Wei, decimal string.
    pub value: String,
    /// Hex call data.
    pub data: String,
    pub chain_id: u64,
}

impl UnsignedLegacyTx {
    pub fn to_tx_legacy(&self) -> Result<TxLegacy> {
        let to = Address::from_str(&append_0x(&self.to))
            .map_err(|err| TxError::CreateFailed(format!("bad to address: {err}")))?;
        let gas_price = parse_big_uint(&self.gas_price)
            .and_then(|p| u128::try_from(p).ok())
            .ok_or_else(|| TxError::CreateFailed("gas price out of range".into()))?;
        let value = parse_big_uint(&self.value)
            .ok_or_else(|| TxError::CreateFailed("bad value".into()))?;
        let input = hex::decode(strip_0x(&self.data))
            .map_err(|err| TxError::CreateFailed(format!("bad call data: {err}")))?;
        Ok(TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: self.nonce,
            gas_price,
            gas_limit: self.gas_limit,
            to: TxKind::Call(to),
            value,
            input: Bytes::from(input),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct TxFeeInfo {
    pub gas_limit: U256,
    pub gas_price: U256,
    pub fee: U256,
}

impl TxFeeInfo {
    pub fn calc_fee(&mut self) {
        self.fee = self.gas_limit * self.gas_price;
    }
}

#[derive(Debug, Clone, Default)]
pub struct AddrBalance {
    pub address: String,
    pub balance: U256,
    pub token_balance: Option<U256>,
}

/// Resolve gas limit and gas price per configuration: fixed values win,
/// otherwise estimate/read dynamically with the configured price offset.
pub async fn get_transaction_fee_estimated<C: ChainApi + ?Sized>(
    node: &C,
    config: &WalletConfig,
    from: &str,
    to: &str,
    value: Option<U256>,
    data: Option<&[u8]>,
) -> Result<TxFeeInfo> {
    let gas_limit = if config.fix_gas_limit > U256::ZERO {
        config.fix_gas_limit
    } else {
        let call = CallMsg {
            from: from.to_string(),
            to: to.to_string(),
            value,
            data: data.unwrap_or_default().to_vec(),
            ..CallMsg::default()
        };
        node.estimate_gas(&call).await?
    };

    let gas_price = if config.fix_gas_price > U256::ZERO {
        config.fix_gas_price
    } else {
        node.gas_price().await? + config.offset_gas_price
    };

    let mut fee = TxFeeInfo {
        gas_limit,
        gas_price,
        fee: U256::ZERO,
    };
    fee.calc_fee();
    Ok(fee)
}

pub struct TxBuilder<C: ChainApi + 'static> {
    node: Arc<C>,
    config: WalletConfig,
    codec: AddressCodec,
    nonce_tracker: NonceTracker<C>,
}

impl<C: ChainApi + 'static> TxBuilder<C> {
    pub fn new(node: Arc<C>, config: WalletConfig, codec: AddressCodec) -> Self {
        let nonce_tracker = NonceTracker::new(Arc::clone(&node), config.nonce_compute_mode);
        Self {
            node,
            config,
            codec,
            nonce_tracker,
        }
    }

    pub fn nonce_tracker(&self) -> &NonceTracker<C> {
        &self.nonce_tracker
    }

    /// Current dynamic gas price scaled to native decimals, with its unit.
    pub async fn get_raw_transaction_fee_rate(&self) -> Result<(String, String)> {
        let price = self.node.gas_price().await?;
        Ok((
            amount_to_decimal_string(&price, self.config.decimals),
            "Gas".to_string(),
        ))
    }

    pub async fn create_raw_transaction(
        &self,
        dai: &dyn WalletDai,
        raw_tx: &mut RawTransaction,
    ) -> Result<()> {
        if raw_tx.coin.is_contract {
            self.create_erc20_raw_transaction(dai, raw_tx).await
        } else {
            self.create_simple_raw_transaction(dai, raw_tx, None).await
        }
    }

    /// Native-coin transfer: pick the smallest balance that covers
    /// `amount + fee`.
    pub async fn create_simple_raw_transaction(
        &self,
        dai: &dyn WalletDai,
        raw_tx: &mut RawTransaction,
        tmp_nonce: Option<u64>,
    ) -> Result<()> {
        let addresses = dai.get_address_list(&raw_tx.account_id)?;
        if addresses.is_empty() {
            return Err(TxError::AccountNotAddress(raw_tx.account_id.clone()).into());
        }

        let (to, amount_str) = raw_tx.first_destination()?;
        let amount = decimal_string_to_amount(&amount_str, self.config.decimals)
            .ok_or_else(|| TxError::CreateFailed(format!("bad amount `{amount_str}`")))?;

        let mut candidates = Vec::with_capacity(addresses.len());
        for address in &addresses {
            let balance = match self
                .node
                .balance(&append_0x(address), BalanceTag::Pending)
                .await
            {
                Ok(balance) => balance,
                Err(_) => {
                    self.node
                        .balance(&append_0x(address), BalanceTag::Latest)
                        .await?
                }
            };
            candidates.push(AddrBalance {
                address: address.clone(),
                balance,
                token_balance: None,
            });
        }
        candidates.sort_by(|a, b| a.balance.cmp(&b.balance));

        let mut found: Option<(AddrBalance, TxFeeInfo)> = None;
        for candidate in candidates {
            let mut fee = match get_transaction_fee_estimated(
                self.node.as_ref(),
                &self.config,
                &candidate.address,
                &to,
                Some(amount),
                None,
            )
            .await
            {
                Ok(fee) => fee,
                Err(_) => continue,
            };
            if !raw_tx.fee_rate.is_empty() {
                fee.gas_price = decimal_string_to_amount(&raw_tx.fee_rate, self.config.decimals)
                    .ok_or_else(|| {
                        TxError::CreateFailed(format!("bad fee rate `{}`", raw_tx.fee_rate))
                    })?;
                fee.calc_fee();
            }
            if candidate.balance >= amount + fee.fee {
                found = Some((candidate, fee));
                break;
            }
        }

        let Some((selected, fee)) = found else {
            return Err(TxError::InsufficientBalance {
                symbol: raw_tx.coin.symbol.clone(),
                available: amount_str,
            }
            .into());
        };

        self.create_raw_transaction_inner(dai, raw_tx, &selected, &fee, &[], tmp_nonce)
            .await
    }

    /// ERC-20 transfer: the token balance must cover the amount and the
    /// native balance must cover the fee.
    pub async fn create_erc20_raw_transaction(
        &self,
        dai: &dyn WalletDai,
        raw_tx: &mut RawTransaction,
    ) -> Result<()> {
        let contract = raw_tx
            .coin
            .contract
            .clone()
            .ok_or(TxError::MissingAbi)?;
        let token_decimals = contract.decimals;

        let addresses = dai.get_address_list(&raw_tx.account_id)?;
        if addresses.is_empty() {
            return Err(TxError::AccountNotAddress(raw_tx.account_id.clone()).into());
        }

        let (to, amount_str) = raw_tx.first_destination()?;
        let amount = decimal_string_to_amount(&amount_str, token_decimals)
            .ok_or_else(|| TxError::CreateFailed(format!("bad amount `{amount_str}`")))?;

        let mut candidates = Vec::with_capacity(addresses.len());
        for address in &addresses {
            let token_balance =
                contracts::erc20_balance_of(self.node.as_ref(), &contract.address, address)
                    .await?;
            candidates.push(AddrBalance {
                address: address.clone(),
                balance: U256::ZERO,
                token_balance: Some(token_balance),
            });
        }
        candidates.sort_by(|a, b| a.token_balance.cmp(&b.token_balance));

        let mut token_insufficient = false;
        let mut fees_insufficient = false;
        let mut last_coin_balance = String::from("0");
        let mut found: Option<(AddrBalance, TxFeeInfo, Vec<u8>)> = None;

        for mut candidate in candidates {
            if candidate.token_balance.unwrap_or_default() < amount {
                token_insufficient = true;
                continue;
            }

            let call_data = crate::abi::encode_abi_param(
                crate::abi::erc20_abi(),
                &["transfer", &self.codec.decode(&to), &amount.to_string()],
            )?;

            let mut fee = get_transaction_fee_estimated(
                self.node.as_ref(),
                &self.config,
                &candidate.address,
                &contract.address,
                None,
                Some(&call_data),
            )
            .await?;
            if !raw_tx.fee_rate.is_empty() {
                fee.gas_price = decimal_string_to_amount(&raw_tx.fee_rate, self.config.decimals)
                    .ok_or_else(|| {
                        TxError::CreateFailed(format!("bad fee rate `{}`", raw_tx.fee_rate))
                    })?;
                fee.calc_fee();
            }

            let coin_balance = match self
                .node
                .balance(&append_0x(&candidate.address), BalanceTag::Pending)
                .await
            {
                Ok(balance) => balance,
                Err(_) => continue,
            };
            if coin_balance < fee.fee {
                last_coin_balance = amount_to_decimal_string(&coin_balance, self.config.decimals);
                fees_insufficient = true;
                continue;
            }

            candidate.balance = coin_balance;
            found = Some((candidate, fee, call_data));
            break;
        }

        let Some((selected, fee, call_data)) = found else {
            if token_insufficient {
                return Err(TxError::InsufficientTokenBalance {
                    symbol: contract.token.clone(),
                    available: amount_str,
                }
                .into());
            }
            if fees_insufficient {
                return Err(TxError::InsufficientFees {
                    symbol: raw_tx.coin.symbol.clone(),
                    available: last_coin_balance,
                }
                .into());
            }
            return Err(TxError::AccountNotAddress(raw_tx.account_id.clone()).into());
        };

        self.create_raw_transaction_inner(dai, raw_tx, &selected, &fee, &call_data, None)
            .await
    }

    /// Final assembly: balance checks, nonce, RLP build, signing-hash stash.
    async fn create_raw_transaction_inner(
        &self,
        dai: &dyn WalletDai,
        raw_tx: &mut RawTransaction,
        addr_balance: &AddrBalance,
        fee: &TxFeeInfo,
        call_data: &[u8],
        tmp_nonce: Option<u64>,
    ) -> Result<()> {
        let (destination, amount_str) = raw_tx.first_destination()?;
        let is_contract = raw_tx.coin.is_contract;
        let token_decimals = raw_tx
            .coin
            .contract
            .as_ref()
            .map(|c| c.decimals)
            .unwrap_or(0);

        raw_tx.fee_rate = amount_to_decimal_string(&fee.gas_price, self.config.decimals);
        raw_tx.fees = amount_to_decimal_string(&fee.fee, self.config.decimals);
        raw_tx.tx_from = vec![format!("{}:{amount_str}", addr_balance.address)];
        raw_tx.tx_to = vec![format!("{destination}:{amount_str}")];

        // The account's net movement: fees always, the amount too unless
        // the destination belongs to the same account.
        let own_addresses = dai.get_address_list(&raw_tx.account_id)?;
        let internal = own_addresses
            .iter()
            .any(|a| normalize_address(a) == normalize_address(&destination));
        let mut total_sent = raw_tx.fees.clone();
        if !internal {
            total_sent = add_decimal_strings(&total_sent, &amount_str)
                .unwrap_or_else(|| amount_str.clone());
        }
        raw_tx.tx_amount = format!("-{total_sent}");

        let nonce = match tmp_nonce {
            Some(nonce) => nonce,
            None => {
                self.nonce_tracker
                    .next_nonce(dai, &addr_balance.address)
                    .await?
            }
        };

        let (to_field, value, data) = if is_contract {
            let amount = decimal_string_to_amount(&amount_str, token_decimals)
                .ok_or_else(|| TxError::CreateFailed(format!("bad amount `{amount_str}`")))?;
            if addr_balance.token_balance.unwrap_or_default() < amount {
                return Err(TxError::InsufficientTokenBalance {
                    symbol: raw_tx.coin.symbol.clone(),
                    available: amount_str,
                }
                .into());
            }
            if addr_balance.balance < fee.fee {
                return Err(TxError::InsufficientFees {
                    symbol: raw_tx.coin.symbol.clone(),
                    available: amount_to_decimal_string(
                        &addr_balance.balance,
                        self.config.decimals,
                    ),
                }
                .into());
            }
            let contract_address = raw_tx
                .coin
                .contract
                .as_ref()
                .map(|c| c.address.clone())
                .unwrap_or_default();
            (contract_address, U256::ZERO, call_data.to_vec())
        } else {
            let amount = decimal_string_to_amount(&amount_str, self.config.decimals)
                .ok_or_else(|| TxError::CreateFailed(format!("bad amount `{amount_str}`")))?;
            if addr_balance.balance < amount + fee.fee {
                return Err(TxError::InsufficientBalance {
                    symbol: raw_tx.coin.symbol.clone(),
                    available: amount_str,
                }
                .into());
            }
            (destination.clone(), amount, Vec::new())
        };

        let gas_limit = u64::try_from(fee.gas_limit)
            .map_err(|_| TxError::CreateFailed("gas limit out of range".into()))?;
        let unsigned = UnsignedLegacyTx {
            nonce,
            gas_price: fee.gas_price.to_string(),
            gas_limit,
            to: self.codec.decode(&to_field),
            value: value.to_string(),
            data: hex::encode(&data),
            chain_id: self.config.chain_id,
        };
        let tx = unsigned.to_tx_legacy()?;

        let mut preimage = Vec::new();
        tx.encode_for_signing(&mut preimage);
        let message = tx.signature_hash();

        raw_tx.raw_hex = hex::encode(&preimage);
        raw_tx.unsigned = Some(unsigned);
        raw_tx.signatures = vec![KeySignature {
            ecc_type: self.config.curve_type,
            nonce: format!("0x{nonce:x}"),
            address: addr_balance.address.clone(),
            message: hex::encode(message),
            signature: String::new(),
        }];
        raw_tx.is_built = true;
        Ok(())
    }

    /// Check the 65-byte r‖s‖v signature recovers the signing address from
    /// the stashed EIP-155 hash.
    pub fn verify_raw_transaction(&self, raw_tx: &RawTransaction) -> Result<()> {
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
        let hash = B256::from_slice(&hash_bytes);
        let recovered = signature
            .recover_address_from_prehash(&hash)
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

    /// Attach the signature, broadcast, and advance or reset the nonce cache
    /// depending on the outcome.
    pub async fn submit_raw_transaction(
        &self,
        dai: &dyn WalletDai,
        raw_tx: &mut RawTransaction,
    ) -> Result<TransactionRecord> {
        self.verify_raw_transaction(raw_tx)?;

        let keysig = raw_tx.signatures[0].clone();
        let from = keysig.address.clone();
        let unsigned = raw_tx
            .unsigned
            .clone()
            .ok_or_else(|| TxError::SubmitFailed("transaction is not built".into()))?;
        let tx = unsigned.to_tx_legacy()?;
        let signature = parse_signature(&keysig.signature)?;
        let signed = tx.into_signed(signature);
        let encoded = signed.encoded_2718();

        match self
            .node
            .send_raw_transaction(&append_0x(&hex::encode(&encoded)))
            .await
        {
            Err(err) => {
                // Failed broadcast resets the cache so the next build
                // re-reads the chain count.
                self.nonce_tracker.update_nonce(dai, &from, 0);
                Err(TxError::SubmitFailed(err.to_string()).into())
            }
            Ok(tx_id) => {
                self.nonce_tracker
                    .update_nonce(dai, &from, unsigned.nonce + 1);
                raw_tx.tx_id = tx_id.clone();
                raw_tx.is_submit = true;

                let (decimals, fees) = if raw_tx.coin.is_contract {
                    (
                        raw_tx
                            .coin
                            .contract
                            .as_ref()
                            .map(|c| c.decimals)
                            .unwrap_or(0),
                        "0".to_string(),
                    )
                } else {
                    (self.config.decimals, raw_tx.fees.clone())
                };

                Ok(TransactionRecord {
                    tx_id,
                    coin: raw_tx.coin.clone(),
                    amount: raw_tx.tx_amount.clone(),
                    fees,
                    from: raw_tx.tx_from.clone(),
                    to: raw_tx.tx_to.clone(),
                    submit_time: now_unix(),
                    decimals,
                    ..TransactionRecord::default()
                })
            }
        }
    }
}

pub(crate) fn parse_signature(sig_hex: &str) -> Result<Signature> {
    let bytes = hex::decode(strip_0x(sig_hex))
        .map_err(|err| TxError::SignatureInvalid(format!("bad signature hex: {err}")))?;
    if bytes.len() != 65 {
        return Err(TxError::SignatureInvalid(format!(
            "signature must be 65 bytes, got {}",
            bytes.len()
        ))
        .into());
    }
    Signature::from_raw(&bytes).map_err(|err| TxError::SignatureInvalid(err.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::testutil::MockChain;
    use alloy::signers::{local::PrivateKeySigner, SignerSync};
    use crate::store::WalletDai as _;

    fn builder(node: Arc<MockChain>) -> TxBuilder<MockChain> {
        let mut config = WalletConfig::new("QUORUM");
        config.chain_id = 10;
        TxBuilder::new(node, config, AddressCodec::passthrough())
    }

    fn one_coin() -> U256 {
        U256::from(10u64).pow(U256::from(18u64))
    }

    #[tokio::test]
    async fn test_simple_build_picks_smallest_sufficient_balance() {
        let node = Arc::new(MockChain::new());
        let dai = SqliteStore::open_in_memory().unwrap();
        dai.add_account_address("acct", "0x1111111111111111111111111111111111111111")
            .unwrap();
        dai.add_account_address("acct", "0x2222222222222222222222222222222222222222")
            .unwrap();
        // 21000 gas * 1 gwei = 21_000 gwei fee; first address can't cover
        // amount + fee, second can.
        node.set_balance(
            "0x1111111111111111111111111111111111111111",
            BalanceTag::Latest,
            one_coin(),
        );
        node.set_balance(
            "0x2222222222222222222222222222222222222222",
            BalanceTag::Latest,
            one_coin() * U256::from(2u64),
        );
        node.set_tx_count("0x2222222222222222222222222222222222222222", 5);

        let b = builder(Arc::clone(&node));
        let mut raw_tx = RawTransaction::new(
            Coin::native("QUORUM"),
            "acct",
            "0x3440f720862aa7dfd4f86ecc78542b3ded900c02",
            "1",
        );
        b.create_simple_raw_transaction(&dai, &mut raw_tx, None)
            .await
            .unwrap();

        assert!(raw_tx.is_built);
        let unsigned = raw_tx.unsigned.as_ref().unwrap();
        assert_eq!(unsigned.nonce, 5);
        assert_eq!(unsigned.chain_id, 10);
        assert_eq!(unsigned.value, one_coin().to_string());
        assert_eq!(
            raw_tx.signatures[0].address,
            "0x2222222222222222222222222222222222222222"
        );
        assert_eq!(raw_tx.signatures[0].message.len(), 64);
        assert!(!raw_tx.raw_hex.is_empty());
    }

    #[tokio::test]
    async fn test_simple_build_insufficient_balance() {
        let node = Arc::new(MockChain::new());
        let dai = SqliteStore::open_in_memory().unwrap();
        dai.add_account_address("acct", "0x1111111111111111111111111111111111111111")
            .unwrap();
        node.set_balance(
            "0x1111111111111111111111111111111111111111",
            BalanceTag::Latest,
            U256::from(10u64),
        );

        let b = builder(Arc::clone(&node));
        let mut raw_tx = RawTransaction::new(
            Coin::native("QUORUM"),
            "acct",
            "0x3440f720862aa7dfd4f86ecc78542b3ded900c02",
            "1",
        );
        let err = b
            .create_simple_raw_transaction(&dai, &mut raw_tx, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not enough"));
    }

    #[tokio::test]
    async fn test_fee_rate_override_recomputes_fee() {
        let node = Arc::new(MockChain::new());
        let dai = SqliteStore::open_in_memory().unwrap();
        dai.add_account_address("acct", "0x1111111111111111111111111111111111111111")
            .unwrap();
        node.set_balance(
            "0x1111111111111111111111111111111111111111",
            BalanceTag::Latest,
            one_coin() * U256::from(10u64),
        );

        let b = builder(Arc::clone(&node));
        let mut raw_tx = RawTransaction::new(
            Coin::native("QUORUM"),
            "acct",
            "0x3440f720862aa7dfd4f86ecc78542b3ded900c02",
            "1",
        );
        // 2 gwei as a decimal string in 18 decimals
        raw_tx.fee_rate = "0.000000002".to_string();
        b.create_simple_raw_transaction(&dai, &mut raw_tx, None)
            .await
            .unwrap();
        assert_eq!(
            raw_tx.unsigned.as_ref().unwrap().gas_price,
            "2000000000"
        );
        // fees = 21000 * 2 gwei = 42_000 gwei
        assert_eq!(raw_tx.fees, "0.000042");
    }

    #[tokio::test]
    async fn test_sign_verify_and_submit_advances_nonce() {
        let node = Arc::new(MockChain::new());
        let dai = SqliteStore::open_in_memory().unwrap();
        let signer = PrivateKeySigner::random();
        let from = format!("{:#x}", signer.address());
        dai.add_account_address("acct", &from).unwrap();
        node.set_balance(&from, BalanceTag::Latest, one_coin() * U256::from(3u64));
        node.set_tx_count(&from, 9);

        let b = builder(Arc::clone(&node));
        let mut raw_tx = RawTransaction::new(
            Coin::native("QUORUM"),
            "acct",
            "0x3440f720862aa7dfd4f86ecc78542b3ded900c02",
            "1",
        );
        b.create_simple_raw_transaction(&dai, &mut raw_tx, None)
            .await
            .unwrap();
        assert_eq!(raw_tx.unsigned.as_ref().unwrap().nonce, 9);

        // Wallet-side signing over the stashed hash.
        let hash = B256::from_slice(&hex::decode(&raw_tx.signatures[0].message).unwrap());
        let signature = signer.sign_hash_sync(&hash).unwrap();
        raw_tx.signatures[0].signature = hex::encode(signature.as_bytes());

        b.verify_raw_transaction(&raw_tx).unwrap();
        let record = b.submit_raw_transaction(&dai, &mut raw_tx).await.unwrap();
        assert!(raw_tx.is_submit);
        assert!(!record.tx_id.is_empty());
        assert_eq!(dai.get_address_nonce(&from).unwrap(), Some(10));
        assert_eq!(node.sent_raw.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_failure_resets_nonce() {
        let node = Arc::new(MockChain::new());
        node.fail_send
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let dai = SqliteStore::open_in_memory().unwrap();
        let signer = PrivateKeySigner::random();
        let from = format!("{:#x}", signer.address());
        dai.add_account_address("acct", &from).unwrap();
        dai.set_address_nonce(&from, 7).unwrap();
        node.set_balance(&from, BalanceTag::Latest, one_coin() * U256::from(3u64));
        node.set_tx_count(&from, 7);

        let b = builder(Arc::clone(&node));
        let mut raw_tx = RawTransaction::new(
            Coin::native("QUORUM"),
            "acct",
            "0x3440f720862aa7dfd4f86ecc78542b3ded900c02",
            "1",
        );
        b.create_simple_raw_transaction(&dai, &mut raw_tx, None)
            .await
            .unwrap();
        let hash = B256::from_slice(&hex::decode(&raw_tx.signatures[0].message).unwrap());
        let signature = signer.sign_hash_sync(&hash).unwrap();
        raw_tx.signatures[0].signature = hex::encode(signature.as_bytes());

        let err = b.submit_raw_transaction(&dai, &mut raw_tx).await.unwrap_err();
        assert!(err.to_string().contains("submit raw transaction failed"));
        // Reset: next read falls through to the chain count.
        assert_eq!(dai.get_address_nonce(&from).unwrap(), None);
    }

    #[tokio::test]
    async fn test_verify_rejects_empty_and_foreign_signatures() {
        let node = Arc::new(MockChain::new());
        let dai = SqliteStore::open_in_memory().unwrap();
        let signer = PrivateKeySigner::random();
        let from = format!("{:#x}", signer.address());
        dai.add_account_address("acct", &from).unwrap();
        node.set_balance(&from, BalanceTag::Latest, one_coin() * U256::from(3u64));

        let b = builder(Arc::clone(&node));
        let mut raw_tx = RawTransaction::new(
            Coin::native("QUORUM"),
            "acct",
            "0x3440f720862aa7dfd4f86ecc78542b3ded900c02",
            "1",
        );
        b.create_simple_raw_transaction(&dai, &mut raw_tx, None)
            .await
            .unwrap();

        assert!(b.verify_raw_transaction(&raw_tx).is_err());

        // A signature from a different key recovers the wrong address.
        let stranger = PrivateKeySigner::random();
        let hash = B256::from_slice(&hex::decode(&raw_tx.signatures[0].message).unwrap());
        let signature = stranger.sign_hash_sync(&hash).unwrap();
        raw_tx.signatures[0].signature = hex::encode(signature.as_bytes());
        let err = b.verify_raw_transaction(&raw_tx).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_unsigned_legacy_round_trip() {
        let unsigned = UnsignedLegacyTx {
            nonce: 3,
            gas_price: "1000000000".into(),
            gas_limit: 21_000,
            to: "0x3440f720862aa7dfd4f86ecc78542b3ded900c02".into(),
            value: "1".into(),
            data: String::new(),
            chain_id: 10,
        };
        let tx = unsigned.to_tx_legacy().unwrap();
        assert_eq!(tx.nonce, 3);
        assert_eq!(tx.gas_price, 1_000_000_000u128);
        assert_eq!(tx.chain_id, Some(10));
        // EIP-155 preimage hash is stable.
        assert_eq!(tx.signature_hash(), tx.signature_hash());
    }
}
