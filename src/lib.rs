//! Wallet adapter for Quorum/Ethereum-family chains.
//!
//! Three surfaces on top of a JSON-RPC node: the block scanner that turns
//! chain activity into per-watcher transfer and contract-event records, the
//! transaction builder (native, ERC-20, summary sweeps) with externally
//! signed EIP-155 transactions and reconciled nonce tracking, and the
//! contract/NFT facade for ABI calls and interface probing.

pub mod abi;
pub mod address;
pub mod config;
pub mod contracts;
pub mod error;
pub mod nft;
pub mod node;
pub mod rpc;
pub mod scanner;
pub mod store;
pub mod txbuilder;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{NonceComputeMode, WalletConfig};
pub use error::{Result, WalletError};
pub use node::{ChainApi, EthNode};
pub use scanner::{BlockScanObserver, BlockScanner};
pub use store::{SqliteStore, WalletDai};
pub use txbuilder::{RawTransaction, TxBuilder};
