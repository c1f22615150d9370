//! Dust-sweep planning: drain many managed addresses into one summary
//! address, optionally pre-funding gas from a fees-support account.

use super::{
    get_transaction_fee_estimated, AddrBalance, RawTransaction, TxBuilder,
};
use crate::contracts;
use crate::error::{Result, TxError, WalletError};
use crate::node::ChainApi;
use crate::store::WalletDai;
use crate::types::{
    amount_to_decimal_string, append_0x, decimal_string_to_amount, BalanceTag, Coin,
};
use alloy::primitives::U256;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeesSupportAccount {
    pub account_id: String,
    /// Multiplier over the estimated fee, decimal string ("1.3").
    pub fees_support_scale: String,
    /// Fixed top-up amount in native decimals; wins over the scale when set.
    pub fix_support_amount: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryRawTransaction {
    pub coin: Coin,
    pub account_id: String,
    pub summary_address: String,
    /// Minimum balance a source address must hold to be swept.
    pub min_transfer: String,
    /// Balance left behind on each swept address.
    pub retained_balance: String,
    pub fee_rate: String,
    pub fees_support_account: Option<FeesSupportAccount>,
}

/// One planned transaction, or the reason this source address failed.
#[derive(Debug)]
pub struct RawTransactionWithError {
    pub raw_tx: RawTransaction,
    pub error: Option<WalletError>,
}

impl<C: ChainApi + 'static> TxBuilder<C> {
    /// Plan the sweep and keep only the buildable transactions.
    pub async fn create_summary_raw_transaction(
        &self,
        dai: &dyn WalletDai,
        sum_raw_tx: &SummaryRawTransaction,
    ) -> Result<Vec<RawTransaction>> {
        let with_errors = self
            .create_summary_raw_transaction_with_error(dai, sum_raw_tx)
            .await?;
        Ok(with_errors
            .into_iter()
            .filter(|entry| entry.error.is_none())
            .map(|entry| entry.raw_tx)
            .collect())
    }

    /// Plan the sweep, returning per-address errors alongside.
    pub async fn create_summary_raw_transaction_with_error(
        &self,
        dai: &dyn WalletDai,
        sum_raw_tx: &SummaryRawTransaction,
    ) -> Result<Vec<RawTransactionWithError>> {
        if sum_raw_tx.coin.is_contract {
            self.create_erc20_summary_raw_transaction(dai, sum_raw_tx)
                .await
        } else {
            self.create_simple_summary_raw_transaction(dai, sum_raw_tx)
                .await
        }
    }

    /// Native sweep: `sum = balance − retained − fee` per qualifying address.
    pub async fn create_simple_summary_raw_transaction(
        &self,
        dai: &dyn WalletDai,
        sum_raw_tx: &SummaryRawTransaction,
    ) -> Result<Vec<RawTransactionWithError>> {
        let decimals = self.config.decimals;
        let min_transfer =
            decimal_string_to_amount(&sum_raw_tx.min_transfer, decimals).unwrap_or_default();
        let retained =
            decimal_string_to_amount(&sum_raw_tx.retained_balance, decimals).unwrap_or_default();
        if min_transfer < retained {
            return Err(TxError::CreateFailed(
                "mini transfer amount must be greater than address retained balance".into(),
            )
            .into());
        }

        let addresses = dai.get_address_list(&sum_raw_tx.account_id)?;
        if addresses.is_empty() {
            return Err(TxError::AccountNotAddress(sum_raw_tx.account_id.clone()).into());
        }

        let mut planned = Vec::new();
        for address in addresses {
            let balance = match self
                .node
                .balance(&append_0x(&address), BalanceTag::Pending)
                .await
            {
                Ok(balance) => balance,
                Err(_) => {
                    self.node
                        .balance(&append_0x(&address), BalanceTag::Latest)
                        .await?
                }
            };
            if balance < min_transfer {
                continue;
            }
            let mut sum_amount = balance - retained;

            let mut fee = get_transaction_fee_estimated(
                self.node.as_ref(),
                &self.config,
                &address,
                &sum_raw_tx.summary_address,
                Some(sum_amount),
                None,
            )
            .await?;
            if !sum_raw_tx.fee_rate.is_empty() {
                fee.gas_price = decimal_string_to_amount(&sum_raw_tx.fee_rate, decimals)
                    .ok_or_else(|| {
                        TxError::CreateFailed(format!("bad fee rate `{}`", sum_raw_tx.fee_rate))
                    })?;
                fee.calc_fee();
            }

            if sum_amount <= fee.fee {
                continue;
            }
            sum_amount -= fee.fee;

            tracing::debug!(
                address = %address,
                balance = %balance,
                fees = %fee.fee,
                sum_amount = %sum_amount,
                "planning native sweep"
            );

            let mut raw_tx = RawTransaction::new(
                sum_raw_tx.coin.clone(),
                &sum_raw_tx.account_id,
                &sum_raw_tx.summary_address,
                &amount_to_decimal_string(&sum_amount, decimals),
            );
            let error = self
                .create_raw_transaction_inner(
                    dai,
                    &mut raw_tx,
                    &AddrBalance {
                        address: address.clone(),
                        balance,
                        token_balance: None,
                    },
                    &fee,
                    &[],
                    None,
                )
                .await
                .err();
            planned.push(RawTransactionWithError { raw_tx, error });
        }

        Ok(planned)
    }

    /// ERC-20 sweep. Addresses whose native balance cannot pay the call fee
    /// get a pre-funding transaction from the fees-support account when one
    /// is configured; support transactions are ordered before every sweep.
    pub async fn create_erc20_summary_raw_transaction(
        &self,
        dai: &dyn WalletDai,
        sum_raw_tx: &SummaryRawTransaction,
    ) -> Result<Vec<RawTransactionWithError>> {
        let contract = sum_raw_tx
            .coin
            .contract
            .clone()
            .ok_or(TxError::MissingAbi)?;
        let token_decimals = contract.decimals;

        // The support account's nonce is tracked planner-locally so a batch
        // of top-ups doesn't collide.
        let mut support_nonce: Option<u64> = None;
        if let Some(support) = &sum_raw_tx.fees_support_account {
            let support_addresses = dai.get_address_list(&support.account_id)?;
            if support_addresses.is_empty() {
                return Err(
                    TxError::FeesSupportAccountNotFound(support.account_id.clone()).into(),
                );
            }
            let nonce = self
                .node
                .transaction_count(&support_addresses[0])
                .await
                .map_err(|err| {
                    TxError::NonceUnavailable(format!("fees support account: {err}"))
                })?;
            support_nonce = Some(nonce);
        }

        let min_transfer =
            decimal_string_to_amount(&sum_raw_tx.min_transfer, token_decimals).unwrap_or_default();
        let retained = decimal_string_to_amount(&sum_raw_tx.retained_balance, token_decimals)
            .unwrap_or_default();
        if min_transfer < retained {
            return Err(TxError::CreateFailed(
                "mini transfer amount must be greater than address retained balance".into(),
            )
            .into());
        }

        let addresses = dai.get_address_list(&sum_raw_tx.account_id)?;
        if addresses.is_empty() {
            return Err(TxError::AccountNotAddress(sum_raw_tx.account_id.clone()).into());
        }

        let mut support_txs = Vec::new();
        let mut sweep_txs = Vec::new();

        for address in addresses {
            let token_balance =
                contracts::erc20_balance_of(self.node.as_ref(), &contract.address, &address)
                    .await?;
            if token_balance < min_transfer || token_balance.is_zero() {
                continue;
            }
            let sum_amount = token_balance - retained;

            let call_data = crate::abi::encode_abi_param(
                crate::abi::erc20_abi(),
                &[
                    "transfer",
                    &self.codec.decode(&sum_raw_tx.summary_address),
                    &sum_amount.to_string(),
                ],
            )?;

            let mut fee = get_transaction_fee_estimated(
                self.node.as_ref(),
                &self.config,
                &address,
                &contract.address,
                None,
                Some(&call_data),
            )
            .await?;
            if !sum_raw_tx.fee_rate.is_empty() {
                fee.gas_price =
                    decimal_string_to_amount(&sum_raw_tx.fee_rate, self.config.decimals)
                        .ok_or_else(|| {
                            TxError::CreateFailed(format!(
                                "bad fee rate `{}`",
                                sum_raw_tx.fee_rate
                            ))
                        })?;
                fee.calc_fee();
            }

            let coin_balance = match self
                .node
                .balance(&append_0x(&address), BalanceTag::Pending)
                .await
            {
                Ok(balance) => balance,
                Err(_) => continue,
            };

            let mut anticipated_balance = coin_balance;
            if coin_balance < fee.fee {
                let Some(support) = &sum_raw_tx.fees_support_account else {
                    // No support configured: let the sweep record the fee
                    // shortfall for this address.
                    let mut raw_tx = RawTransaction::new(
                        sum_raw_tx.coin.clone(),
                        &sum_raw_tx.account_id,
                        &sum_raw_tx.summary_address,
                        &amount_to_decimal_string(&sum_amount, token_decimals),
                    );
                    let error = self
                        .create_raw_transaction_inner(
                            dai,
                            &mut raw_tx,
                            &AddrBalance {
                                address: address.clone(),
                                balance: coin_balance,
                                token_balance: Some(token_balance),
                            },
                            &fee,
                            &call_data,
                            None,
                        )
                        .await
                        .err();
                    sweep_txs.push(RawTransactionWithError { raw_tx, error });
                    continue;
                };

                let support_wei = resolve_support_amount(support, &fee.fee, self.config.decimals);
                let support_amount =
                    amount_to_decimal_string(&support_wei, self.config.decimals);
                tracing::debug!(
                    support_account = %support.account_id,
                    support_address = %address,
                    amount = %support_amount,
                    "planning fees support transaction"
                );

                let mut support_tx = RawTransaction::new(
                    Coin::native(&sum_raw_tx.coin.symbol),
                    &support.account_id,
                    &address,
                    &support_amount,
                );
                let support_error = self
                    .create_simple_raw_transaction(dai, &mut support_tx, support_nonce)
                    .await
                    .err();
                let support_ok = support_error.is_none();
                support_txs.push(RawTransactionWithError {
                    raw_tx: support_tx,
                    error: support_error,
                });
                if let Some(nonce) = support_nonce.as_mut() {
                    *nonce += 1;
                }
                if !support_ok {
                    continue;
                }
                // The sweep is planned against the post-top-up balance; the
                // caller broadcasts the support transaction first.
                anticipated_balance = coin_balance + support_wei;
            }

            let mut raw_tx = RawTransaction::new(
                sum_raw_tx.coin.clone(),
                &sum_raw_tx.account_id,
                &sum_raw_tx.summary_address,
                &amount_to_decimal_string(&sum_amount, token_decimals),
            );
            raw_tx.fee_rate = sum_raw_tx.fee_rate.clone();
            let error = self
                .create_raw_transaction_inner(
                    dai,
                    &mut raw_tx,
                    &AddrBalance {
                        address: address.clone(),
                        balance: anticipated_balance,
                        token_balance: Some(token_balance),
                    },
                    &fee,
                    &call_data,
                    None,
                )
                .await
                .err();
            sweep_txs.push(RawTransactionWithError { raw_tx, error });
        }

        support_txs.extend(sweep_txs);
        Ok(support_txs)
    }
}

/// Top-up sizing: `fix_amount` wins, else `scale × fee`, else the fee.
fn resolve_support_amount(
    support: &FeesSupportAccount,
    fee_wei: &U256,
    decimals: u32,
) -> U256 {
    if let Some(fix) = decimal_string_to_amount(&support.fix_support_amount, decimals) {
        if fix > U256::ZERO {
            return fix;
        }
    }
    if let Some((numerator, denominator)) = parse_decimal_ratio(&support.fees_support_scale) {
        if numerator > U256::ZERO {
            return fee_wei * numerator / denominator;
        }
    }
    *fee_wei
}

/// "1.3" → (13, 10); exact rational form for fee scaling.
fn parse_decimal_ratio(value: &str) -> Option<(U256, U256)> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (int_part, frac_part) = trimmed.split_once('.').unwrap_or((trimmed, ""));
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let numerator = U256::from_str_radix(&format!("{int_part}{frac_part}"), 10).ok()?;
    let denominator = U256::from(10u64).pow(U256::from(frac_part.len() as u64));
    Some((numerator, denominator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressCodec;
    use crate::config::WalletConfig;
    use crate::store::{SqliteStore, WalletDai};
    use crate::testutil::MockChain;
    use std::sync::Arc;

    fn builder(node: Arc<MockChain>) -> TxBuilder<MockChain> {
        let mut config = WalletConfig::new("QUORUM");
        config.chain_id = 10;
        TxBuilder::new(node, config, AddressCodec::passthrough())
    }

    fn gwei(n: u64) -> U256 {
        U256::from(n) * U256::from(1_000_000_000u64)
    }

    #[test]
    fn test_parse_decimal_ratio() {
        assert_eq!(
            parse_decimal_ratio("1.3"),
            Some((U256::from(13u64), U256::from(10u64)))
        );
        assert_eq!(
            parse_decimal_ratio("2"),
            Some((U256::from(2u64), U256::from(1u64)))
        );
        assert_eq!(parse_decimal_ratio(""), None);
        assert_eq!(parse_decimal_ratio("x"), None);
    }

    #[test]
    fn test_resolve_support_amount_priority() {
        let fee = gwei(21_000);
        // fix amount wins
        let support = FeesSupportAccount {
            account_id: "fees".into(),
            fees_support_scale: "1.3".into(),
            fix_support_amount: "0.001".into(),
        };
        assert_eq!(
            resolve_support_amount(&support, &fee, 18),
            decimal_string_to_amount("0.001", 18).unwrap()
        );
        // then scale
        let support = FeesSupportAccount {
            account_id: "fees".into(),
            fees_support_scale: "1.3".into(),
            fix_support_amount: String::new(),
        };
        assert_eq!(
            resolve_support_amount(&support, &fee, 18),
            fee * U256::from(13u64) / U256::from(10u64)
        );
        // then the fee itself
        let support = FeesSupportAccount::default();
        assert_eq!(resolve_support_amount(&support, &fee, 18), fee);
    }

    #[tokio::test]
    async fn test_native_summary_sweeps_qualifying_addresses() {
        let node = Arc::new(MockChain::new());
        let dai = SqliteStore::open_in_memory().unwrap();
        let one = U256::from(10u64).pow(U256::from(18u64));

        dai.add_account_address("acct", "0x1111111111111111111111111111111111111111")
            .unwrap();
        dai.add_account_address("acct", "0x2222222222222222222222222222222222222222")
            .unwrap();
        // First address below min_transfer, second sweepable.
        node.set_balance(
            "0x1111111111111111111111111111111111111111",
            BalanceTag::Latest,
            one / U256::from(2u64),
        );
        node.set_balance(
            "0x2222222222222222222222222222222222222222",
            BalanceTag::Latest,
            one * U256::from(3u64),
        );

        let b = builder(Arc::clone(&node));
        let sum = SummaryRawTransaction {
            coin: Coin::native("QUORUM"),
            account_id: "acct".into(),
            summary_address: "0x3440f720862aa7dfd4f86ecc78542b3ded900c02".into(),
            min_transfer: "1".into(),
            retained_balance: "0.5".into(),
            ..SummaryRawTransaction::default()
        };
        let planned = b.create_summary_raw_transaction(&dai, &sum).await.unwrap();
        assert_eq!(planned.len(), 1);
        let raw_tx = &planned[0];
        assert!(raw_tx.is_built);
        // sweep = 3 − 0.5 − fee(0.000021)
        let (_, amount) = raw_tx.to.iter().next().map(|(k, v)| (k.clone(), v.clone())).unwrap();
        assert_eq!(amount, "2.499979");
    }

    #[tokio::test]
    async fn test_native_summary_rejects_min_below_retained() {
        let node = Arc::new(MockChain::new());
        let dai = SqliteStore::open_in_memory().unwrap();
        dai.add_account_address("acct", "0x1111111111111111111111111111111111111111")
            .unwrap();
        let b = builder(node);
        let sum = SummaryRawTransaction {
            coin: Coin::native("QUORUM"),
            account_id: "acct".into(),
            summary_address: "0x3440f720862aa7dfd4f86ecc78542b3ded900c02".into(),
            min_transfer: "0.1".into(),
            retained_balance: "1".into(),
            ..SummaryRawTransaction::default()
        };
        assert!(b
            .create_summary_raw_transaction_with_error(&dai, &sum)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_erc20_summary_with_fees_support_account() {
        let node = Arc::new(MockChain::new());
        let dai = SqliteStore::open_in_memory().unwrap();
        let one = U256::from(10u64).pow(U256::from(18u64));

        // Five token holders, no native coin at all.
        let holders: Vec<String> = (1..=5)
            .map(|i| format!("0x{:040x}", 0x1000 + i))
            .collect();
        for holder in &holders {
            dai.add_account_address("acct", holder).unwrap();
        }
        // Fees support account with ample native and chain nonce 3.
        let support_addr = "0x9999999999999999999999999999999999999999";
        dai.add_account_address("fees", support_addr).unwrap();
        node.set_balance(support_addr, BalanceTag::Latest, one * U256::from(100u64));
        node.set_tx_count(support_addr, 3);

        // balanceOf(address) → 200 token units for every holder.
        node.set_call_result("70a08231", &format!("0x{:064x}", 200));

        let contract_address = "0xbff77b4e5a478b8ab92186dbb44a777d66dfa80f";
        let mut coin = Coin::contract("QUORUM", contract_address);
        if let Some(contract) = coin.contract.as_mut() {
            contract.token = "TOK".into();
        }

        let b = builder(Arc::clone(&node));
        let sum = SummaryRawTransaction {
            coin,
            account_id: "acct".into(),
            summary_address: "0x3440f720862aa7dfd4f86ecc78542b3ded900c02".into(),
            min_transfer: "10".into(),
            retained_balance: "0".into(),
            fees_support_account: Some(FeesSupportAccount {
                account_id: "fees".into(),
                fees_support_scale: "1.3".into(),
                fix_support_amount: String::new(),
            }),
            ..SummaryRawTransaction::default()
        };

        let planned = b
            .create_summary_raw_transaction_with_error(&dai, &sum)
            .await
            .unwrap();
        assert_eq!(planned.len(), 10, "5 top-ups then 5 sweeps");

        // First five are the native top-ups with consecutive support nonces.
        let expected_support = gwei(21_000) * U256::from(13u64) / U256::from(10u64);
        for (i, entry) in planned[..5].iter().enumerate() {
            assert!(entry.error.is_none(), "support plan failed: {:?}", entry.error);
            let unsigned = entry.raw_tx.unsigned.as_ref().unwrap();
            assert_eq!(unsigned.nonce, 3 + i as u64);
            assert!(!entry.raw_tx.coin.is_contract);
            assert_eq!(unsigned.value, expected_support.to_string());
        }
        // Last five are the token sweeps.
        for entry in &planned[5..] {
            assert!(entry.error.is_none(), "sweep plan failed: {:?}", entry.error);
            assert!(entry.raw_tx.coin.is_contract);
            let (_, amount) = entry
                .raw_tx
                .to
                .iter()
                .next()
                .map(|(k, v)| (k.clone(), v.clone()))
                .unwrap();
            assert_eq!(amount, "200");
            assert_eq!(entry.raw_tx.unsigned.as_ref().unwrap().value, "0");
        }
    }
}
