//! Forward-moving block scanner.
//!
//! Tracks the chain head against the locally persisted scan position,
//! rewinds two blocks on a parent-hash mismatch (emitting a fork
//! notification for the abandoned block), extracts every transaction of a
//! block through a bounded worker pool, fans results out to observers, and
//! drains the unscanned journal at the end of every tick.

mod extractor;

pub use extractor::{extract_transaction, ExtractResult};

use crate::config::WalletConfig;
use crate::error::{Result, ScanError, WalletError};
use crate::node::ChainApi;
use crate::store::WalletDai;
use crate::types::{
    amount_to_decimal_string, append_0x, Balance, BalanceTag, BlockHeader, BlockTransaction,
    EthBlock, ScanTargetFn, ScanTargetResult, SmartContractReceipt, TxExtractData, UnscanRecord,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Concurrent per-transaction extractions within one block.
pub const MAX_EXTRACTING_SIZE: usize = 15;
/// Concurrent balance queries in one fan-out.
const BALANCE_FANOUT_LIMIT: usize = 20;

pub trait BlockScanObserver: Send + Sync {
    /// Block-level notification; `header.fork` marks an abandoned block.
    fn on_new_block(&self, header: &BlockHeader);
    /// Per-watcher transfer records. Must be idempotent: journal replay
    /// redelivers.
    fn on_tx_extract(&self, source_key: &str, data: &TxExtractData) -> Result<()>;
    /// Per-contract event records. Must be idempotent.
    fn on_contract_extract(&self, source_key: &str, receipt: &SmartContractReceipt) -> Result<()>;
}

pub struct BlockScanner<C: ChainApi + 'static> {
    node: Arc<C>,
    dai: Arc<dyn WalletDai>,
    config: WalletConfig,
    observers: RwLock<Vec<Arc<dyn BlockScanObserver>>>,
    watch_fn: RwLock<Option<ScanTargetFn>>,
    scanning: AtomicBool,
    stop_requested: AtomicBool,
    extracting: Arc<Semaphore>,
}

impl<C: ChainApi + 'static> BlockScanner<C> {
    pub fn new(node: Arc<C>, dai: Arc<dyn WalletDai>, config: WalletConfig) -> Self {
        Self {
            node,
            dai,
            config,
            observers: RwLock::new(Vec::new()),
            watch_fn: RwLock::new(None),
            scanning: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            extracting: Arc::new(Semaphore::new(MAX_EXTRACTING_SIZE)),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn BlockScanObserver>) {
        self.observers
            .write()
            .expect("observer lock poisoned")
            .push(observer);
    }

    /// Install the caller's watch function used by the scan loop.
    pub fn set_scan_target_func(&self, watch: ScanTargetFn) {
        *self.watch_fn.write().expect("watch lock poisoned") = Some(watch);
    }

    fn watch_fn(&self) -> ScanTargetFn {
        self.watch_fn
            .read()
            .expect("watch lock poisoned")
            .clone()
            .unwrap_or_else(|| Arc::new(|_| ScanTargetResult::not_found()))
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.scanning.store(false, Ordering::SeqCst);
    }

    /// Start the task loop; stop with [`BlockScanner::stop`]. Stopping is
    /// cooperative and bounded by one extraction batch.
    pub fn run(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.scanning.store(true, Ordering::SeqCst);
        let scanner = Arc::clone(self);
        tokio::spawn(async move {
            while !scanner.stop_requested.load(Ordering::SeqCst) {
                scanner.scan_block_task().await;
                tokio::time::sleep(interval).await;
            }
        })
    }

    /// Reset the scan position so the next tick starts from `height`.
    pub async fn set_rescan_block_height(&self, height: u64) -> Result<()> {
        if height == 0 {
            return Err(ScanError::InvalidRescanHeight.into());
        }
        let target = height - 1;
        let block = self.node.block_by_number(target, false).await?;
        self.dai
            .save_local_block_head(&self.config.symbol, target, &block.header.block_hash)
    }

    /// Scan one specific height, with notifications.
    pub async fn scan_block(&self, height: u64) -> Result<()> {
        let block = self.node.block_by_number(height, true).await?;
        self.batch_extract_transactions(height, block.transactions.clone())
            .await?;
        self.new_block_notify(&block, false);
        Ok(())
    }

    /// Last scanned position, initialized to `chain_head − 1` when the local
    /// store is empty.
    pub async fn get_scanned_block_header(&self) -> Result<BlockHeader> {
        if let Some((height, hash)) = self.dai.get_local_block_head(&self.config.symbol)? {
            if height > 0 {
                return Ok(BlockHeader {
                    block_height: height,
                    block_hash: hash,
                    symbol: self.config.symbol.clone(),
                    ..BlockHeader::default()
                });
            }
        }
        let head = self.node.block_number().await?;
        let height = head.saturating_sub(1);
        let block = self.node.block_by_number(height, false).await?;
        Ok(BlockHeader {
            block_height: height,
            block_hash: block.header.block_hash,
            symbol: self.config.symbol.clone(),
            ..BlockHeader::default()
        })
    }

    pub async fn get_current_block_header(&self) -> Result<BlockHeader> {
        let height = self.node.block_number().await?;
        let block = self.node.block_by_number(height, false).await?;
        Ok(BlockHeader {
            block_height: height,
            block_hash: block.header.block_hash,
            symbol: self.config.symbol.clone(),
            ..BlockHeader::default()
        })
    }

    pub async fn get_global_max_block_height(&self) -> u64 {
        self.node.block_number().await.unwrap_or(0)
    }

    /// One full catch-up pass: advance to the chain head (handling reorgs),
    /// then drain the unscanned journal.
    pub async fn scan_block_task(&self) {
        let header = match self.get_scanned_block_header().await {
            Ok(header) => header,
            Err(err) => {
                tracing::error!(error = %err, "block scanner can not get scanned block header");
                return;
            }
        };
        let mut cur_height = header.block_height;
        let mut cur_hash = header.block_hash;

        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                // Cooperative stop between blocks.
                return;
            }

            let max_height = match self.node.block_number().await {
                Ok(height) => height,
                Err(err) => {
                    tracing::error!(error = %err, "get chain head failed");
                    break;
                }
            };
            tracing::info!(current = cur_height, chain_head = max_height, "scan progress");
            if cur_height >= max_height {
                tracing::info!(height = max_height, "block scanner has caught up");
                break;
            }

            let next = cur_height + 1;
            let block = match self.node.block_by_number(next, true).await {
                Ok(block) => block,
                Err(err) => {
                    tracing::error!(height = next, error = %err, "get block failed");
                    break;
                }
            };

            if block.header.parent_hash != cur_hash {
                match self.rewind_on_fork(cur_height, &cur_hash, &block).await {
                    Ok((height, hash)) => {
                        cur_height = height;
                        cur_hash = hash;
                        continue;
                    }
                    Err(err) => {
                        // Rewind persistence failure is fatal for the tick.
                        tracing::error!(error = %err, "reorg rewind failed");
                        break;
                    }
                }
            }

            match self
                .batch_extract_transactions(next, block.transactions.clone())
                .await
            {
                Ok(()) => {
                    if let Err(err) = self.dai.save_local_block_head(
                        &self.config.symbol,
                        block.header.block_height,
                        &block.header.block_hash,
                    ) {
                        tracing::error!(error = %err, "save local block head failed");
                        break;
                    }
                    if let Err(err) = self.dai.save_local_block(&block) {
                        tracing::error!(error = %err, "save local block failed");
                    }
                    self.new_block_notify(&block, false);
                }
                Err(err) => {
                    // Height is journaled; move on and let the drain retry it.
                    tracing::warn!(height = next, error = %err, "batch extraction failed");
                }
            }

            cur_height = block.header.block_height;
            cur_hash = block.header.block_hash;
        }

        self.rescan_failed_records().await;
    }

    /// Parent mismatch: abandon the local block at `cur_height`, rewind two
    /// heights and persist the rewound position.
    async fn rewind_on_fork(
        &self,
        cur_height: u64,
        cur_hash: &str,
        mismatching: &EthBlock,
    ) -> Result<(u64, String)> {
        tracing::info!(
            height = mismatching.header.block_height,
            local_hash = %cur_hash,
            mainnet_parent = %mismatching.header.parent_hash,
            "block has been forked"
        );

        let fork_block = self.dai.get_local_block(cur_height).ok().flatten();
        if let Err(err) = self.dai.delete_unscan_record(cur_height) {
            tracing::warn!(height = cur_height, error = %err, "delete unscan record failed");
        }

        let rewind_height = cur_height.saturating_sub(2);
        let rewound = match self.dai.get_local_block(rewind_height)? {
            Some(local) => local,
            None => {
                tracing::info!(height = rewind_height, "local block missing, reloading from chain");
                self.node.block_by_number(rewind_height, false).await?
            }
        };

        self.dai.save_local_block_head(
            &self.config.symbol,
            rewound.header.block_height,
            &rewound.header.block_hash,
        )?;
        tracing::info!(
            height = rewound.header.block_height,
            hash = %rewound.header.block_hash,
            "rescan from rewound block"
        );

        if let Some(fork_block) = fork_block {
            self.new_block_notify(&fork_block, true);
        }

        Ok((
            rewound.header.block_height,
            rewound.header.block_hash.clone(),
        ))
    }

    fn new_block_notify(&self, block: &EthBlock, fork: bool) {
        let header = block.notify_header(&self.config.symbol, fork);
        for observer in self.observers.read().expect("observer lock poisoned").iter() {
            observer.on_new_block(&header);
        }
    }

    /// Extract every transaction of a block through the bounded worker pool
    /// and deliver results in arrival order.
    pub async fn batch_extract_transactions(
        &self,
        height: u64,
        txs: Vec<BlockTransaction>,
    ) -> Result<()> {
        if txs.is_empty() {
            return Ok(());
        }
        let watch = self.watch_fn();
        let should_done = txs.len();
        let (producer, mut worker) = mpsc::channel::<ExtractResult>(should_done);

        for tx in txs {
            let permit = self
                .extracting
                .clone()
                .acquire_owned()
                .await
                .expect("extraction semaphore closed");
            let node = Arc::clone(&self.node);
            let watch = watch.clone();
            let symbol = self.config.symbol.clone();
            let decimals = self.config.decimals;
            let producer = producer.clone();
            tokio::spawn(async move {
                let result =
                    extractor::extract_transaction(node.as_ref(), &symbol, decimals, tx, &watch)
                        .await;
                let _ = producer.send(result).await;
                drop(permit);
            });
        }
        drop(producer);

        let mut done = 0usize;
        let mut failed = 0usize;
        while let Some(result) = worker.recv().await {
            if result.success {
                if let Err(err) = self.new_extract_data_notify(height, &result) {
                    tracing::error!(height, error = %err, "extract data notify failed");
                    failed += 1;
                }
            } else {
                let record = UnscanRecord::new(height, "", "extract failed", &self.config.symbol);
                if let Err(err) = self.dai.save_unscan_record(&record) {
                    tracing::error!(height, error = %err, "save unscan record failed");
                }
                tracing::info!(height, tx_id = %result.tx_id, "transaction extract failed");
                failed += 1;
            }
            done += 1;
            if done == should_done {
                break;
            }
        }

        if failed > 0 {
            Err(ScanError::ExtractFailed(height).into())
        } else {
            Ok(())
        }
    }

    /// Deliver one extraction result to every observer. Observer rejections
    /// journal the height; only a journal write failure propagates.
    fn new_extract_data_notify(&self, height: u64, result: &ExtractResult) -> Result<()> {
        let observers = self.observers.read().expect("observer lock poisoned");
        for observer in observers.iter() {
            for (source_key, data_list) in &result.extract_data {
                for data in data_list {
                    if let Err(err) = observer.on_tx_extract(source_key, data) {
                        let reason = format!("ExtractData notify failed: {err}");
                        let record =
                            UnscanRecord::new(height, "", &reason, &self.config.symbol);
                        self.dai.save_unscan_record(&record)?;
                    }
                }
            }
            for (source_key, receipt) in &result.extract_contract_data {
                if let Err(err) = observer.on_contract_extract(source_key, receipt) {
                    let reason = format!("ExtractContractData notify failed: {err}");
                    let record = UnscanRecord::new(height, "", &reason, &self.config.symbol);
                    self.dai.save_unscan_record(&record)?;
                }
            }
        }
        Ok(())
    }

    /// Journal drain: re-fetch and re-extract every journaled height,
    /// deleting entries that succeed.
    pub async fn rescan_failed_records(&self) {
        let records = match self.dai.get_unscan_records(&self.config.symbol) {
            Ok(records) => records,
            Err(err) => {
                tracing::info!(error = %err, "block scanner can not get rescan data");
                return;
            }
        };

        let mut heights: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        for record in records {
            let entry = heights.entry(record.block_height).or_default();
            if !record.tx_id.is_empty() {
                entry.push(record.tx_id);
            }
        }

        for height in heights.keys().copied() {
            if height == 0 {
                continue;
            }
            tracing::info!(height, "block scanner rescanning journaled height");
            let block = match self.node.block_by_number(height, true).await {
                Ok(block) => block,
                Err(err) => {
                    tracing::info!(height, error = %err, "rescan block fetch failed");
                    continue;
                }
            };
            if let Err(err) = self
                .batch_extract_transactions(height, block.transactions.clone())
                .await
            {
                tracing::info!(height, error = %err, "rescan extraction failed");
                continue;
            }
            if let Err(err) = self.dai.delete_unscan_record(height) {
                tracing::warn!(height, error = %err, "delete unscan record failed");
            }
        }
    }

    /// Extract a single transaction by hash against a caller-supplied watch
    /// function, without touching scanner state.
    pub async fn extract_transaction_and_receipt_data(
        &self,
        txid: &str,
        watch: ScanTargetFn,
    ) -> Result<(
        BTreeMap<String, Vec<TxExtractData>>,
        BTreeMap<String, SmartContractReceipt>,
    )> {
        let tx = self.node.transaction_by_hash(txid).await?;
        let result = extractor::extract_transaction(
            self.node.as_ref(),
            &self.config.symbol,
            self.config.decimals,
            tx,
            &watch,
        )
        .await;
        Ok((result.extract_data, result.extract_contract_data))
    }

    /// Confirmed/pending balances for a set of addresses, fanned out with a
    /// bounded concurrency of 20. Fails if any address fails.
    pub async fn get_balance_by_address(&self, addresses: &[String]) -> Result<Vec<Balance>> {
        let semaphore = Arc::new(Semaphore::new(BALANCE_FANOUT_LIMIT));
        let mut handles = Vec::with_capacity(addresses.len());
        for (index, address) in addresses.iter().enumerate() {
            let node = Arc::clone(&self.node);
            let semaphore = Arc::clone(&semaphore);
            let address = address.clone();
            let symbol = self.config.symbol.clone();
            let decimals = self.config.decimals;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("balance semaphore closed");
                let confirmed = node
                    .balance(&append_0x(&address), BalanceTag::Latest)
                    .await?;
                let all = match node.balance(&append_0x(&address), BalanceTag::Pending).await {
                    Ok(all) => all,
                    Err(_) => confirmed,
                };
                let unconfirmed = all.saturating_sub(confirmed);
                Ok::<(usize, Balance), WalletError>((
                    index,
                    Balance {
                        symbol,
                        address,
                        balance: amount_to_decimal_string(&all, decimals),
                        confirm_balance: amount_to_decimal_string(&confirmed, decimals),
                        unconfirm_balance: amount_to_decimal_string(&unconfirmed, decimals),
                    },
                ))
            }));
        }

        let mut results = vec![Balance::default(); addresses.len()];
        for handle in handles {
            match handle.await {
                Ok(Ok((index, balance))) => results[index] = balance,
                Ok(Err(err)) => {
                    tracing::error!(error = %err, "get address balance failed");
                    return Err(err);
                }
                Err(err) => {
                    return Err(crate::error::RpcError::Transport(format!(
                        "balance task join error: {err}"
                    ))
                    .into())
                }
            }
        }
        Ok(results)
    }
}
