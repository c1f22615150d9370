//! NFT contract interaction: interface probing, balances and ownership,
//! metadata, and transfer-event classification.

use crate::abi;
use crate::config::WalletConfig;
use crate::error::{NftError, Result};
use crate::node::ChainApi;
use crate::types::{
    append_0x, gen_contract_id, normalize_address, CallMsg, InterfaceType, SmartContract,
    SmartContractEvent,
};
use alloy::dyn_abi::DynSolValue;
use alloy::json_abi::JsonAbi;
use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// ERC-165 interface ids probed to recognize NFT contracts.
pub const ERC721_INTERFACE_ID: &str = "0x80ac58cd";
pub const ERC1155_INTERFACE_ID: &str = "0xd9b67a26";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Nft {
    pub symbol: String,
    pub address: String,
    pub token: String,
    pub name: String,
    pub protocol: String,
    /// Empty means "the whole collection" where the query allows it.
    pub token_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct NftBalance {
    pub nft: Nft,
    pub balance: String,
}

#[derive(Debug, Clone, Default)]
pub struct NftOwner {
    pub nft: Nft,
    pub owner: String,
}

#[derive(Debug, Clone, Default)]
pub struct NftMetaData {
    pub nft: Nft,
    pub uri: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NftEventType {
    Transfer,
    Mint,
    Burn,
}

#[derive(Debug, Clone)]
pub struct NftTransfer {
    pub tokens: Vec<Nft>,
    pub operator: String,
    pub from: String,
    pub to: String,
    pub amounts: Vec<String>,
    pub event_type: NftEventType,
}

pub struct NftDecoder<C: ChainApi + 'static> {
    node: Arc<C>,
    config: WalletConfig,
}

impl<C: ChainApi + 'static> NftDecoder<C> {
    pub fn new(node: Arc<C>, config: WalletConfig) -> Self {
        Self { node, config }
    }

    /// Read-only ABI invocation from the zero caller address.
    pub async fn call_abi(
        &self,
        contract_address: &str,
        abi_instance: &JsonAbi,
        abi_param: &[&str],
    ) -> Result<BTreeMap<String, DynSolValue>> {
        let method = abi_param.first().copied().unwrap_or_default();
        let data = abi::encode_abi_param(abi_instance, abi_param)?;
        let call = CallMsg {
            from: ZERO_ADDRESS.to_string(),
            to: append_0x(contract_address),
            value: Some(U256::ZERO),
            data,
            ..CallMsg::default()
        };
        let result = self.node.eth_call(&call, "latest").await?;
        let (map, _) = abi::decode_abi_result(abi_instance, method, &result)?;
        Ok(map)
    }

    /// ERC-165 probe: first true of ERC-721 then ERC-1155 wins.
    pub async fn supports_interface(&self, contract_address: &str) -> InterfaceType {
        let probe721 = self
            .call_abi(
                contract_address,
                abi::erc721_abi(),
                &["supportsInterface", ERC721_INTERFACE_ID],
            )
            .await;
        if let Ok(map) = probe721 {
            if map.get("").and_then(|v| v.as_bool()).unwrap_or(false) {
                return InterfaceType::Erc721;
            }
        }

        let probe1155 = self
            .call_abi(
                contract_address,
                abi::erc1155_abi(),
                &["supportsInterface", ERC1155_INTERFACE_ID],
            )
            .await;
        if let Ok(map) = probe1155 {
            if map.get("").and_then(|v| v.as_bool()).unwrap_or(false) {
                return InterfaceType::Erc1155;
            }
        }

        InterfaceType::Unknown
    }

    /// Recognize an NFT contract and load its metadata. `symbol()` and
    /// `name()` are best-effort; probe failure returns `None`.
    pub async fn load_contract_info(&self, contract_address: &str) -> Option<SmartContract> {
        let interface_type = self.supports_interface(contract_address).await;
        let (abi_json, abi_instance) = match interface_type {
            InterfaceType::Erc721 => (abi::ERC721_ABI_JSON, abi::erc721_abi()),
            InterfaceType::Erc1155 => (abi::ERC1155_ABI_JSON, abi::erc1155_abi()),
            _ => return None,
        };

        let token = match self.call_abi(contract_address, abi_instance, &["symbol"]).await {
            Ok(map) => map
                .get("")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            Err(_) => String::new(),
        };
        let name = match self.call_abi(contract_address, abi_instance, &["name"]).await {
            Ok(map) => map
                .get("")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            Err(_) => String::new(),
        };

        let contract_id = gen_contract_id(&self.config.symbol, contract_address);
        Some(SmartContract {
            contract_id,
            symbol: self.config.symbol.clone(),
            address: contract_address.to_string(),
            token,
            name,
            protocol: interface_type.as_str().to_string(),
            decimals: 0,
            abi_json: abi_json.to_string(),
        })
    }

    /// Balance query routed by protocol: `balanceOf(address)` for ERC-721
    /// collections, `ownerOf(tokenId)` comparison for a single ERC-721
    /// token, `balanceOf(address,uint256)` for ERC-1155.
    pub async fn get_nft_balance_by_address(&self, nft: &Nft, owner: &str) -> Result<NftBalance> {
        let balance = match nft.protocol.as_str() {
            "erc721" => {
                if nft.token_id.is_empty() {
                    let map = self
                        .call_abi(&nft.address, abi::erc721_abi(), &["balanceOf", owner])
                        .await?;
                    map.get("balance")
                        .and_then(|v| v.as_uint())
                        .map(|(value, _)| value)
                        .unwrap_or(U256::ZERO)
                } else {
                    let nft_owner = self.get_nft_owner_by_token_id(nft).await?;
                    if nft_owner.owner == normalize_address(owner) {
                        U256::from(1u64)
                    } else {
                        U256::ZERO
                    }
                }
            }
            "erc1155" => {
                if nft.token_id.is_empty() {
                    return Err(NftError::TokenIdEmpty.into());
                }
                let map = self
                    .call_abi(
                        &nft.address,
                        abi::erc1155_abi(),
                        &["balanceOf", owner, &nft.token_id],
                    )
                    .await?;
                map.get("")
                    .and_then(|v| v.as_uint())
                    .map(|(value, _)| value)
                    .unwrap_or(U256::ZERO)
            }
            _ => return Err(NftError::InterfaceNotSupported(nft.address.clone()).into()),
        };

        Ok(NftBalance {
            nft: nft.clone(),
            balance: balance.to_string(),
        })
    }

    /// `ownerOf(tokenId)` for ERC-721.
    pub async fn get_nft_owner_by_token_id(&self, nft: &Nft) -> Result<NftOwner> {
        if nft.protocol != "erc721" {
            return Err(NftError::InterfaceNotSupported(nft.address.clone()).into());
        }
        if nft.token_id.is_empty() {
            return Err(NftError::TokenIdEmpty.into());
        }
        let map = self
            .call_abi(&nft.address, abi::erc721_abi(), &["ownerOf", &nft.token_id])
            .await?;
        let owner = map
            .get("owner")
            .and_then(|v| v.as_address())
            .map(|address| normalize_address(&format!("{address:#x}")))
            .unwrap_or_default();
        Ok(NftOwner {
            nft: nft.clone(),
            owner,
        })
    }

    /// `tokenURI(tokenId)` for ERC-721.
    pub async fn get_nft_metadata(&self, nft: &Nft) -> Result<NftMetaData> {
        if nft.protocol != "erc721" {
            return Err(NftError::InterfaceNotSupported(nft.address.clone()).into());
        }
        if nft.token_id.is_empty() {
            return Err(NftError::TokenIdEmpty.into());
        }
        let map = self
            .call_abi(&nft.address, abi::erc721_abi(), &["tokenURI", &nft.token_id])
            .await?;
        let uri = map
            .get("")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(NftMetaData {
            nft: nft.clone(),
            uri,
        })
    }

    /// Classify an already-decoded contract event into an NFT transfer.
    ///
    /// `Transfer` → ERC-721 single, `TransferSingle` → ERC-1155 single,
    /// `TransferBatch` → ERC-1155 batch. A zero-address sender marks a mint,
    /// a zero-address recipient a burn.
    pub fn parse_nft_transfer(&self, event: &SmartContractEvent) -> Result<NftTransfer> {
        if event.value.is_empty() {
            return Err(NftError::EventEmpty.into());
        }
        let decoded: Value = serde_json::from_str(&event.value)
            .map_err(|_| NftError::EventEmpty)?;
        let contract = &event.contract;

        let nft_for = |token_id: String, protocol: &str| Nft {
            symbol: contract.symbol.clone(),
            address: contract.address.clone(),
            token: contract.token.clone(),
            name: contract.name.clone(),
            protocol: protocol.to_string(),
            token_id,
        };
        let field = |name: &str| -> String {
            decoded
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let (tokens, operator, from, to, amounts) = match event.event.as_str() {
            "Transfer" => {
                let from = field("from");
                (
                    vec![nft_for(field("tokenId"), "erc721")],
                    from.clone(),
                    from,
                    field("to"),
                    vec!["1".to_string()],
                )
            }
            "TransferSingle" => (
                vec![nft_for(field("id"), "erc1155")],
                field("operator"),
                field("from"),
                field("to"),
                vec![field("value")],
            ),
            "TransferBatch" => {
                let string_list = |name: &str| -> Vec<String> {
                    decoded
                        .get(name)
                        .and_then(Value::as_array)
                        .map(|items| {
                            items
                                .iter()
                                .map(|item| {
                                    item.as_str().map(str::to_string).unwrap_or_default()
                                })
                                .collect()
                        })
                        .unwrap_or_default()
                };
                let tokens = string_list("ids")
                    .into_iter()
                    .map(|id| nft_for(id, "erc1155"))
                    .collect();
                (
                    tokens,
                    field("operator"),
                    field("from"),
                    field("to"),
                    string_list("values"),
                )
            }
            _ => return Err(NftError::InterfaceNotSupported(contract.address.clone()).into()),
        };

        let event_type = if normalize_address(&from) == ZERO_ADDRESS {
            NftEventType::Mint
        } else if normalize_address(&to) == ZERO_ADDRESS {
            NftEventType::Burn
        } else {
            NftEventType::Transfer
        };

        Ok(NftTransfer {
            tokens,
            operator,
            from,
            to,
            amounts,
            event_type,
        })
    }
}
