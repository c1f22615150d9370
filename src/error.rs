use thiserror::Error;

pub type Result<T> = std::result::Result<T, WalletError>;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
    #[error("abi error: {0}")]
    Abi(#[from] AbiError),
    #[error("transaction error: {0}")]
    Tx(#[from] TxError),
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("nft error: {0}")]
    Nft(#[from] NftError),
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("node error [{code}] {message}")]
    Node { code: i64, message: String },
    #[error("response has no result field")]
    EmptyResponse,
    #[error("response decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("abi json parse failed: {0}")]
    Parse(String),
    #[error("abi method `{0}` not found")]
    MethodNotFound(String),
    #[error("no event matches topic {0}")]
    EventNotFound(String),
    #[error("method `{method}` takes {expected} arguments, got {got}")]
    ArgumentCount {
        method: String,
        expected: usize,
        got: usize,
    },
    #[error("argument `{value}` is not a valid `{ty}`: {reason}")]
    InvalidArgument {
        ty: String,
        value: String,
        reason: String,
    },
    #[error("abi encode failed: {0}")]
    Encode(String),
    #[error("abi decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum TxError {
    #[error("the [{symbol}] balance: {available} is not enough")]
    InsufficientBalance { symbol: String, available: String },
    #[error("the [{symbol}] balance: {available} is not enough to call smart contract")]
    InsufficientFees { symbol: String, available: String },
    #[error("the token balance: {available} is not enough")]
    InsufficientTokenBalance { symbol: String, available: String },
    #[error("account [{0}] has no addresses")]
    AccountNotAddress(String),
    #[error("contract abi json is empty")]
    MissingAbi,
    #[error("transaction signature is empty")]
    EmptySignature,
    #[error("transaction signature invalid: {0}")]
    SignatureInvalid(String),
    #[error("contract call msg invalid: {0}")]
    CallMsgInvalid(String),
    #[error("nonce unavailable for {0}")]
    NonceUnavailable(String),
    #[error("create raw transaction failed: {0}")]
    CreateFailed(String),
    #[error("submit raw transaction failed: {0}")]
    SubmitFailed(String),
    #[error("fees support account not found: {0}")]
    FeesSupportAccountNotFound(String),
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("extraction failed at height {0}")]
    ExtractFailed(u64),
    #[error("rescan height must be greater than 0")]
    InvalidRescanHeight,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite failure: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("data directory unavailable: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored value corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum NftError {
    #[error("NFT interface type is not supported for contract {0}")]
    InterfaceNotSupported(String),
    #[error("NFT token id is empty")]
    TokenIdEmpty,
    #[error("smart contract event is empty")]
    EventEmpty,
}

impl From<rusqlite::Error> for WalletError {
    fn from(err: rusqlite::Error) -> Self {
        WalletError::Store(StoreError::Sqlite(err))
    }
}
