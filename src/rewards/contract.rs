//! Reward contract access over EVM JSON-RPC

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::abi::{self, AbiError, Address, Word};

/// Reward contract operations used by the claim flow
#[async_trait]
pub trait RewardContract: Send + Sync {
    async fn can_claim(&self, player: Address) -> Result<ClaimEligibility, RewardError>;

    async fn contract_stats(&self) -> Result<ContractStats, RewardError>;

    async fn player_stats(&self, player: Address) -> Result<PlayerStats, RewardError>;

    /// Submit `claimReward()` from `from`; returns the transaction hash
    async fn claim_reward(&self, from: Address) -> Result<String, RewardError>;

    /// Block until the transaction is mined
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxReceipt, RewardError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClaimEligibility {
    pub can_claim: bool,
    pub seconds_until_next: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContractStats {
    pub balance_wei: u128,
    pub total_rewards_wei: u128,
    pub player_count: u64,
    pub reward_amount_wei: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlayerStats {
    pub total_claims: u64,
    pub total_earned_wei: u128,
    /// Unix seconds of the last claim, 0 if never
    pub last_claim_at: u64,
    pub can_claim: bool,
    pub next_claim_in: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub block_number: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RewardError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("{message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<String>,
    },

    #[error("Malformed response: {0}")]
    Decode(#[from] AbiError),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Transaction {0} reverted")]
    Reverted(String),

    #[error("Timed out waiting for receipt of {0}")]
    ReceiptTimeout(String),
}

impl RewardError {
    /// Message text including revert data, for failure classification
    pub fn raw_message(&self) -> String {
        match self {
            RewardError::Rpc {
                message,
                data: Some(data),
                ..
            } => format!("{message} {data}"),
            other => other.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// Contract client over a JSON-RPC node
///
/// Transactions are signed by the node for the `from` account, so the
/// player's account must be managed by the node.
pub struct JsonRpcRewardContract {
    client: Client,
    rpc_url: String,
    contract: Address,
    receipt_timeout: Duration,
    poll_interval: Duration,
    next_id: AtomicU64,
}

impl JsonRpcRewardContract {
    pub fn new(rpc_url: impl Into<String>, contract: Address, receipt_timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            rpc_url: rpc_url.into(),
            contract,
            receipt_timeout,
            poll_interval: Duration::from_secs(2),
            next_id: AtomicU64::new(1),
        }
    }

    #[cfg(test)]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, RewardError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self.client.post(&self.rpc_url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RewardError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: RpcResponse = response.json().await?;
        if let Some(err) = envelope.error {
            debug!(method, code = err.code, message = %err.message, "RPC call failed");
            return Err(RewardError::Rpc {
                code: err.code,
                message: err.message,
                data: err.data.map(|d| match d {
                    Value::String(s) => s,
                    other => other.to_string(),
                }),
            });
        }

        Ok(envelope.result.unwrap_or(Value::Null))
    }

    async fn call(&self, data: String, expected: usize) -> Result<Vec<Word>, RewardError> {
        let result = self
            .rpc(
                "eth_call",
                json!([{ "to": self.contract.to_string(), "data": data }, "latest"]),
            )
            .await?;

        let hex = result
            .as_str()
            .ok_or_else(|| RewardError::Malformed("eth_call result is not a string".to_string()))?;
        Ok(abi::decode_words(hex, expected)?)
    }

    async fn poll_receipt(&self, tx_hash: &str) -> Result<TxReceipt, RewardError> {
        loop {
            let receipt = self
                .rpc("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;

            if receipt.is_null() {
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            let field = |name: &str| -> Result<u64, RewardError> {
                receipt
                    .get(name)
                    .and_then(Value::as_str)
                    .map(abi::parse_quantity)
                    .transpose()?
                    .ok_or_else(|| RewardError::Malformed(format!("receipt missing {name}")))
            };

            if field("status")? == 0 {
                return Err(RewardError::Reverted(tx_hash.to_string()));
            }
            return Ok(TxReceipt {
                tx_hash: tx_hash.to_string(),
                block_number: field("blockNumber")?,
            });
        }
    }
}

#[async_trait]
impl RewardContract for JsonRpcRewardContract {
    async fn can_claim(&self, player: Address) -> Result<ClaimEligibility, RewardError> {
        let words = self
            .call(abi::encode_call(abi::CAN_PLAYER_CLAIM, &[player.to_word()]), 2)
            .await?;

        Ok(ClaimEligibility {
            can_claim: abi::word_to_bool(&words[0]),
            seconds_until_next: abi::word_to_u64(&words[1])?,
        })
    }

    async fn contract_stats(&self) -> Result<ContractStats, RewardError> {
        let words = self
            .call(abi::encode_call(abi::GET_CONTRACT_STATS, &[]), 4)
            .await?;

        Ok(ContractStats {
            balance_wei: abi::word_to_u128(&words[0])?,
            total_rewards_wei: abi::word_to_u128(&words[1])?,
            player_count: abi::word_to_u64(&words[2])?,
            reward_amount_wei: abi::word_to_u128(&words[3])?,
        })
    }

    async fn player_stats(&self, player: Address) -> Result<PlayerStats, RewardError> {
        let words = self
            .call(abi::encode_call(abi::GET_PLAYER_STATS, &[player.to_word()]), 5)
            .await?;

        Ok(PlayerStats {
            total_claims: abi::word_to_u64(&words[0])?,
            total_earned_wei: abi::word_to_u128(&words[1])?,
            last_claim_at: abi::word_to_u64(&words[2])?,
            can_claim: abi::word_to_bool(&words[3]),
            next_claim_in: abi::word_to_u64(&words[4])?,
        })
    }

    async fn claim_reward(&self, from: Address) -> Result<String, RewardError> {
        let tx = json!([{
            "from": from.to_string(),
            "to": self.contract.to_string(),
            "data": abi::encode_call(abi::CLAIM_REWARD, &[]),
        }]);
        let result = self.rpc("eth_sendTransaction", tx).await?;

        let tx_hash = result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| RewardError::Malformed("transaction hash is not a string".to_string()))?;

        info!(player = %from, tx_hash = %tx_hash, "Claim transaction submitted");
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<TxReceipt, RewardError> {
        tokio::time::timeout(self.receipt_timeout, self.poll_receipt(tx_hash))
            .await
            .map_err(|_| RewardError::ReceiptTimeout(tx_hash.to_string()))?
    }
}
