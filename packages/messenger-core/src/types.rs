use serde::{Deserialize, Serialize};
use crate::Error;

/// 单侧（源链或目标链）的确认状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed,
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxStatus::Pending => "pending",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 一次跨链消息发送的本地记录
///
/// 字段名以 camelCase 序列化，与历史记录的持久化格式保持一致。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossChainTransaction {
    pub id: String,
    pub message: String,
    pub source_chain_id: String,
    pub destination_chain_id: String,
    pub recipient: String,
    pub source_status: TxStatus,
    pub destination_status: TxStatus,
    /// 创建时间（毫秒时间戳）
    pub timestamp: u64,
    pub source_tx_hash: Option<String>,
    pub destination_tx_hash: Option<String>,
}

impl CrossChainTransaction {
    /// 创建处于 (pending, pending) 状态的新记录
    pub fn new(id: String, params: SendMessageParams, timestamp: u64) -> Self {
        Self {
            id,
            message: params.message,
            source_chain_id: params.source_chain_id,
            destination_chain_id: params.destination_chain_id,
            recipient: params.recipient,
            source_status: TxStatus::Pending,
            destination_status: TxStatus::Pending,
            timestamp,
            source_tx_hash: None,
            destination_tx_hash: None,
        }
    }

    /// 源链确认，只允许从 pending 迁移一次
    pub fn confirm_source(&mut self, tx_hash: String) -> Result<(), Error> {
        if self.source_status != TxStatus::Pending {
            return Err(Error::InvalidTransition(format!(
                "source of {} is already {}",
                self.id, self.source_status
            )));
        }
        self.source_status = TxStatus::Confirmed;
        self.source_tx_hash = Some(tx_hash);
        Ok(())
    }

    /// 源链失败，之后不会再进入目标链阶段
    pub fn fail_source(&mut self) -> Result<(), Error> {
        if self.source_status != TxStatus::Pending {
            return Err(Error::InvalidTransition(format!(
                "source of {} is already {}",
                self.id, self.source_status
            )));
        }
        self.source_status = TxStatus::Failed;
        self.source_tx_hash = None;
        Ok(())
    }

    /// 目标链确认，要求源链已经确认
    pub fn confirm_destination(&mut self, tx_hash: String) -> Result<(), Error> {
        if self.source_status != TxStatus::Confirmed {
            return Err(Error::InvalidTransition(format!(
                "destination of {} cannot confirm while source is {}",
                self.id, self.source_status
            )));
        }
        if self.destination_status != TxStatus::Pending {
            return Err(Error::InvalidTransition(format!(
                "destination of {} is already {}",
                self.id, self.destination_status
            )));
        }
        self.destination_status = TxStatus::Confirmed;
        self.destination_tx_hash = Some(tx_hash);
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.source_status == TxStatus::Failed
            || (self.source_status == TxStatus::Confirmed
                && self.destination_status == TxStatus::Confirmed)
    }
}

/// 表现层提交的发送参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageParams {
    pub message: String,
    pub source_chain_id: String,
    pub destination_chain_id: String,
    pub recipient: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GasTrend {
    Up,
    Down,
    Stable,
}

/// Gas 费用报价，金额均为格式化后的字符串
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub source_gas: String,
    pub destination_gas: String,
    pub total_gas: String,
    pub source_usd: String,
    pub destination_usd: String,
    pub total_usd: String,
    pub source_trend: GasTrend,
    pub destination_trend: GasTrend,
    pub estimated_time: String,
    pub timestamp: u64,
}

/// Gas 估算请求，同时作为缓存键和“最新请求”的身份
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimateParams {
    pub source_chain: String,
    pub destination_chain: String,
    pub message: String,
    pub recipient: String,
}

impl GasEstimateParams {
    /// 两条链都已选择且不同才会触发估算
    pub fn is_ready(&self) -> bool {
        !self.source_chain.is_empty()
            && !self.destination_chain.is_empty()
            && self.source_chain != self.destination_chain
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CrossChainTransaction {
        CrossChainTransaction::new(
            "1".to_string(),
            SendMessageParams {
                message: "hello".to_string(),
                source_chain_id: "11155111".to_string(),
                destination_chain_id: "421614".to_string(),
                recipient: "0x000000000000000000000000000000000000dEaD".to_string(),
            },
            1_700_000_000_000,
        )
    }

    #[test]
    fn test_destination_requires_confirmed_source() {
        let mut tx = sample();
        assert!(tx.confirm_destination("0xbb".to_string()).is_err());
        assert_eq!(tx.destination_status, TxStatus::Pending);
        assert!(tx.destination_tx_hash.is_none());

        tx.confirm_source("0xaa".to_string()).unwrap();
        tx.confirm_destination("0xbb".to_string()).unwrap();
        assert!(tx.is_terminal());
        assert_eq!(tx.destination_tx_hash.as_deref(), Some("0xbb"));
    }

    #[test]
    fn test_source_transitions_once() {
        let mut tx = sample();
        tx.confirm_source("0xaa".to_string()).unwrap();
        assert!(tx.confirm_source("0xcc".to_string()).is_err());
        assert!(tx.fail_source().is_err());
        assert_eq!(tx.source_tx_hash.as_deref(), Some("0xaa"));
    }

    #[test]
    fn test_failed_source_is_terminal() {
        let mut tx = sample();
        tx.fail_source().unwrap();
        assert!(tx.is_terminal());
        assert!(tx.source_tx_hash.is_none());
        assert!(tx.confirm_destination("0xbb".to_string()).is_err());
    }

    #[test]
    fn test_persisted_layout() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["sourceChainId"], "11155111");
        assert_eq!(value["sourceStatus"], "pending");
        assert!(value["sourceTxHash"].is_null());
    }
}
