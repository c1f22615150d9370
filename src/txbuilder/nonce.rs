//! Per-address monotonic nonce tracking reconciled against the chain.
//!
//! The cache lives in the caller-supplied wallet store. A successful
//! broadcast writes `nonce + 1` back; a failed broadcast writes 0, which the
//! store reads back as unset so the next build re-reads from chain.

use crate::config::NonceComputeMode;
use crate::error::{Result, TxError};
use crate::node::ChainApi;
use crate::store::WalletDai;
use std::sync::Arc;

pub struct NonceTracker<C: ChainApi> {
    node: Arc<C>,
    mode: NonceComputeMode,
}

impl<C: ChainApi> NonceTracker<C> {
    pub fn new(node: Arc<C>, mode: NonceComputeMode) -> Self {
        Self { node, mode }
    }

    /// Resolve the nonce for the next build from this address.
    ///
    /// Auto-increment mode takes `max(cached, chain_count)` so transactions
    /// queued faster than the network indexes them keep advancing; gaps
    /// introduced by external senders close on the next read. Chain-latest
    /// mode trusts the node alone.
    pub async fn next_nonce(&self, dai: &dyn WalletDai, address: &str) -> Result<u64> {
        let cached = match self.mode {
            NonceComputeMode::AutoIncrement => dai.get_address_nonce(address)?.unwrap_or(0),
            NonceComputeMode::ChainLatest => 0,
        };

        match self.node.transaction_count(address).await {
            Ok(chain_count) => match self.mode {
                NonceComputeMode::AutoIncrement => Ok(cached.max(chain_count)),
                NonceComputeMode::ChainLatest => Ok(chain_count),
            },
            Err(err) => {
                // Chain read failed; the cache covers us unless it is empty.
                if cached > 0 && self.mode == NonceComputeMode::AutoIncrement {
                    tracing::warn!(address, error = %err, "nonce chain read failed, using cached value");
                    Ok(cached)
                } else {
                    Err(TxError::NonceUnavailable(format!("{address}: {err}")).into())
                }
            }
        }
    }

    /// Write the cache through the wallet store. `0` resets the address so
    /// the next read falls through to the chain count.
    pub fn update_nonce(&self, dai: &dyn WalletDai, address: &str, nonce: u64) {
        if let Err(err) = dai.set_address_nonce(address, nonce) {
            tracing::error!(address, nonce, error = %err, "set address nonce failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::store::WalletDai as _;
    use crate::types::{
        BalanceTag, BlockTransaction, CallMsg, EthBlock, SyncStatus, TransactionReceipt,
    };
    use alloy::primitives::U256;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedChain {
        count: u64,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl ChainApi for FixedChain {
        async fn block_number(&self) -> Result<u64> {
            unreachable!()
        }
        async fn block_by_number(&self, _: u64, _: bool) -> Result<EthBlock> {
            unreachable!()
        }
        async fn transaction_by_hash(&self, _: &str) -> Result<BlockTransaction> {
            unreachable!()
        }
        async fn transaction_receipt(&self, _: &str) -> Result<TransactionReceipt> {
            unreachable!()
        }
        async fn transaction_count(&self, _: &str) -> Result<u64> {
            if self.fail.load(Ordering::SeqCst) {
                Err(crate::error::RpcError::Transport("down".into()).into())
            } else {
                Ok(self.count)
            }
        }
        async fn balance(&self, _: &str, _: BalanceTag) -> Result<U256> {
            unreachable!()
        }
        async fn estimate_gas(&self, _: &CallMsg) -> Result<U256> {
            unreachable!()
        }
        async fn gas_price(&self) -> Result<U256> {
            unreachable!()
        }
        async fn chain_id(&self) -> Result<u64> {
            unreachable!()
        }
        async fn eth_call(&self, _: &CallMsg, _: &str) -> Result<String> {
            unreachable!()
        }
        async fn send_raw_transaction(&self, _: &str) -> Result<String> {
            unreachable!()
        }
        async fn code_at(&self, _: &str) -> Result<String> {
            unreachable!()
        }
        async fn syncing_status(&self) -> Result<SyncStatus> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_auto_increment_takes_max_of_cache_and_chain() {
        let dai = SqliteStore::open_in_memory().unwrap();
        let node = Arc::new(FixedChain {
            count: 9,
            fail: AtomicBool::new(false),
        });
        let tracker = NonceTracker::new(node, NonceComputeMode::AutoIncrement);

        // Cached 7, chain 9: chain wins.
        dai.set_address_nonce("0xab", 7).unwrap();
        assert_eq!(tracker.next_nonce(&dai, "0xab").await.unwrap(), 9);

        // Successful broadcast writes 10; chain still reports 9: cache wins.
        tracker.update_nonce(&dai, "0xab", 10);
        assert_eq!(tracker.next_nonce(&dai, "0xab").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_chain_latest_ignores_cache() {
        let dai = SqliteStore::open_in_memory().unwrap();
        let node = Arc::new(FixedChain {
            count: 4,
            fail: AtomicBool::new(false),
        });
        let tracker = NonceTracker::new(node, NonceComputeMode::ChainLatest);
        dai.set_address_nonce("0xab", 99).unwrap();
        assert_eq!(tracker.next_nonce(&dai, "0xab").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_chain_read_failure_falls_back_to_cache() {
        let dai = SqliteStore::open_in_memory().unwrap();
        let node = Arc::new(FixedChain {
            count: 0,
            fail: AtomicBool::new(true),
        });
        let tracker = NonceTracker::new(node, NonceComputeMode::AutoIncrement);

        dai.set_address_nonce("0xab", 5).unwrap();
        assert_eq!(tracker.next_nonce(&dai, "0xab").await.unwrap(), 5);

        // Empty cache surfaces the failure.
        assert!(tracker.next_nonce(&dai, "0xcd").await.is_err());
    }

    #[tokio::test]
    async fn test_reset_to_zero_forces_chain_read() {
        let dai = SqliteStore::open_in_memory().unwrap();
        let node = Arc::new(FixedChain {
            count: 3,
            fail: AtomicBool::new(false),
        });
        let tracker = NonceTracker::new(node, NonceComputeMode::AutoIncrement);
        dai.set_address_nonce("0xab", 50).unwrap();
        tracker.update_nonce(&dai, "0xab", 0);
        assert_eq!(tracker.next_nonce(&dai, "0xab").await.unwrap(), 3);
    }
}
