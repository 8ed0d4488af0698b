use std::sync::Arc;
use crate::{types::CrossChainTransaction, Error};
use super::KeyValueStore;

/// 以单个键保存的历史记录列表，最新的在前
#[derive(Clone)]
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
}

impl HistoryStore {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 读取历史；键不存在时返回 `Ok(None)`
    pub fn load(&self) -> Result<Option<Vec<CrossChainTransaction>>, Error> {
        match self.store.get(&self.key)? {
            Some(raw) => {
                let history = serde_json::from_str(&raw).map_err(|e| {
                    Error::Persistence(format!("Failed to parse history under {}: {}", self.key, e))
                })?;
                Ok(Some(history))
            }
            None => Ok(None),
        }
    }

    pub fn save(&self, history: &[CrossChainTransaction]) -> Result<(), Error> {
        let raw = serde_json::to_string(history)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        self.store.set(&self.key, &raw)
    }
}
