//! 消息生命周期引擎
//!
//! 提交时创建 (pending, pending) 记录并写入历史，随后由调度器在两个随机
//! 延迟后依次确认源链和目标链。所有对历史的修改都经过 `commit`：持锁读取
//! 最新持久化历史、按 id 替换、写回并发布，中间没有让出点，因此不同交易的
//! 定时回调交错执行时不会覆盖彼此的状态。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use log::{debug, error, info, warn};
use rand::Rng;
use tokio::sync::watch;
use crate::{
    config::{ChainConfig, Config, EngineConfig},
    events::{EventBus, NotificationKind},
    scheduler::{Scheduler, Stage, TaskKey},
    store::{HistoryStore, KeyValueStore},
    types::{now_millis, CrossChainTransaction, SendMessageParams},
    validation::{sanitize_input, validate_address, validate_chain_selection, validate_message},
    Error,
};

/// 生成 `0x` 加 64 位十六进制的模拟交易哈希
pub fn generate_tx_hash() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    format!("0x{}", hex::encode(bytes))
}

#[derive(Default)]
struct WriteState {
    /// 最近一次写入失败，内存中的历史比存储更新
    dirty: bool,
}

struct EngineInner {
    config: EngineConfig,
    chains: Vec<ChainConfig>,
    history_store: HistoryStore,
    scheduler: Scheduler,
    events: EventBus,
    current: watch::Sender<Option<CrossChainTransaction>>,
    history: watch::Sender<Vec<CrossChainTransaction>>,
    write_state: Mutex<WriteState>,
    last_id: AtomicU64,
}

#[derive(Clone)]
pub struct MessageEngine {
    inner: Arc<EngineInner>,
}

impl MessageEngine {
    /// 创建引擎并从存储加载已有历史。必须在 tokio runtime 内调用。
    pub fn new(config: &Config, store: Arc<dyn KeyValueStore>, events: EventBus) -> Result<Self, Error> {
        let scheduler = Scheduler::new()?;
        let history_store = HistoryStore::new(store, config.storage.history_key.clone());

        let history = match history_store.load() {
            Ok(Some(history)) => history,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to load message history, starting empty: {}", e);
                Vec::new()
            }
        };
        info!("Loaded {} messages from history", history.len());

        let last_id = history
            .iter()
            .filter_map(|tx| tx.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);

        let (current, _) = watch::channel(None);
        let (history_tx, _) = watch::channel(history);

        Ok(Self {
            inner: Arc::new(EngineInner {
                config: config.engine.clone(),
                chains: config.chains.clone(),
                history_store,
                scheduler,
                events,
                current,
                history: history_tx,
                write_state: Mutex::new(WriteState::default()),
                last_id: AtomicU64::new(last_id),
            }),
        })
    }

    /// 提交一条跨链消息。
    ///
    /// 校验失败时返回 `Error::Validation`，不会进入后台流程；成功时记录已写入
    /// 历史并安排确认任务，立即返回新记录。
    pub fn submit(&self, params: SendMessageParams) -> Result<CrossChainTransaction, Error> {
        let params = self.inner.check_params(params)?;

        let tx = CrossChainTransaction::new(self.inner.next_id(), params, now_millis());
        info!(
            "Submitting message {} from {} to {}",
            tx.id, tx.source_chain_id, tx.destination_chain_id
        );

        self.inner.current.send_replace(Some(tx.clone()));
        self.inner.commit(|history| history.insert(0, tx.clone()));

        self.inner.events.publish(
            "Message Sent!",
            "Your cross-chain message has been initiated successfully",
            NotificationKind::Default,
            Some(&tx.id),
        );

        self.inner.schedule_source(tx.clone());
        Ok(tx)
    }

    /// 最近一次提交的交易的实时状态
    pub fn current_transaction(&self) -> Option<CrossChainTransaction> {
        self.inner.current.borrow().clone()
    }

    pub fn message_history(&self) -> Vec<CrossChainTransaction> {
        self.inner.history.borrow().clone()
    }

    pub fn watch_current(&self) -> watch::Receiver<Option<CrossChainTransaction>> {
        self.inner.current.subscribe()
    }

    pub fn watch_history(&self) -> watch::Receiver<Vec<CrossChainTransaction>> {
        self.inner.history.subscribe()
    }

    /// 手动与存储重新同步，可以随时重复调用。
    ///
    /// 内存中存在未落盘的修改时先尝试写回，写回失败则保留内存状态。
    pub fn refresh_history(&self) {
        let inner = &self.inner;
        let mut state = inner.write_state.lock().unwrap_or_else(PoisonError::into_inner);

        if state.dirty {
            let snapshot = inner.history.borrow().clone();
            match inner.history_store.save(&snapshot) {
                Ok(()) => {
                    state.dirty = false;
                    info!("Flushed {} unsaved messages to storage", snapshot.len());
                }
                Err(e) => warn!("Storage still unavailable, keeping in-memory history: {}", e),
            }
            return;
        }

        match inner.history_store.load() {
            Ok(Some(history)) => {
                debug!("Refreshed {} messages from storage", history.len());
                inner.history.send_replace(history);
            }
            Ok(None) => debug!("No stored history under {}", inner.history_store.key()),
            Err(e) => warn!("Failed to refresh message history: {}", e),
        }
    }

    /// 取消某笔交易尚未执行的确认任务，记录保持当前状态
    pub fn cancel(&self, tx_id: &str) -> usize {
        let cancelled = self.inner.scheduler.cancel(tx_id);
        if cancelled > 0 {
            info!("Cancelled {} pending confirmations for {}", cancelled, tx_id);
        }
        cancelled
    }

    /// 停止全部待执行的确认任务，用于关闭引擎前收尾
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.inner.scheduler.cancel_all();
        if cancelled > 0 {
            info!("Cancelled all {} pending confirmations", cancelled);
        }
        cancelled
    }

    pub fn pending_confirmations(&self) -> usize {
        self.inner.scheduler.pending_count()
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }
}

impl EngineInner {
    fn check_params(&self, params: SendMessageParams) -> Result<SendMessageParams, Error> {
        if params.message.trim().is_empty() || params.recipient.trim().is_empty() {
            return Err(Error::Validation("Message and recipient are required".to_string()));
        }

        validate_message(&params.message).into_result()?;

        let recipient = sanitize_input(&params.recipient);
        if !validate_address(&recipient) {
            return Err(Error::Validation("Invalid recipient address".to_string()));
        }

        let message = sanitize_input(&params.message);
        if message.is_empty() {
            return Err(Error::Validation("Message cannot be empty".to_string()));
        }

        let source_chain_id = params.source_chain_id.trim().to_string();
        let destination_chain_id = params.destination_chain_id.trim().to_string();
        validate_chain_selection(&source_chain_id, &destination_chain_id).into_result()?;

        if self.config.enforce_chain_registry {
            for chain_id in [&source_chain_id, &destination_chain_id] {
                if !self.chains.iter().any(|c| c.id.to_string() == *chain_id) {
                    return Err(Error::Validation(format!("Unsupported chain: {}", chain_id)));
                }
            }
        }

        Ok(SendMessageParams {
            message,
            source_chain_id,
            destination_chain_id,
            recipient,
        })
    }

    /// 毫秒时间戳作为 id，同一毫秒内递增保证唯一
    fn next_id(&self) -> String {
        let now = now_millis();
        let mut last = self.last_id.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last_id
                .compare_exchange_weak(last, candidate, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return candidate.to_string(),
                Err(actual) => last = actual,
            }
        }
    }

    /// 单写者提交：读取最新历史、修改、写回、发布，全程持锁且不让出
    fn commit<F>(&self, mutate: F)
    where
        F: FnOnce(&mut Vec<CrossChainTransaction>),
    {
        let mut state = self.write_state.lock().unwrap_or_else(PoisonError::into_inner);

        let mut history = if state.dirty {
            self.history.borrow().clone()
        } else {
            match self.history_store.load() {
                Ok(Some(history)) => history,
                Ok(None) => Vec::new(),
                Err(e) => {
                    warn!("Failed to read message history, using in-memory copy: {}", e);
                    self.history.borrow().clone()
                }
            }
        };

        mutate(&mut history);

        match self.history_store.save(&history) {
            Ok(()) => state.dirty = false,
            Err(e) => {
                warn!("Failed to persist message history: {}", e);
                state.dirty = true;
            }
        }

        self.history.send_replace(history);
    }

    /// 按 id 替换历史中的记录，并在它仍是当前交易时同步当前状态
    fn apply(&self, tx: &CrossChainTransaction) {
        self.commit(|history| match history.iter_mut().find(|entry| entry.id == tx.id) {
            Some(entry) => *entry = tx.clone(),
            None => warn!("Message {} is no longer in history", tx.id),
        });

        self.current.send_if_modified(|current| match current {
            Some(current) if current.id == tx.id => {
                *current = tx.clone();
                true
            }
            _ => false,
        });
    }

    fn schedule_source(self: &Arc<Self>, tx: CrossChainTransaction) {
        let delay = self.config.source_delay.sample();
        let key = TaskKey::new(&tx.id, Stage::Source);
        let engine = Arc::clone(self);
        self.scheduler.schedule(key, delay, move || engine.settle_source(tx));
    }

    fn schedule_destination(self: &Arc<Self>, tx: CrossChainTransaction) {
        let delay = self.config.destination_delay.sample();
        let key = TaskKey::new(&tx.id, Stage::Destination);
        let engine = Arc::clone(self);
        self.scheduler.schedule(key, delay, move || engine.settle_destination(tx));
    }

    fn source_should_fail(&self) -> bool {
        let rate = self.config.source_failure_rate;
        rate > 0.0 && rand::thread_rng().gen::<f64>() < rate
    }

    fn settle_source(self: &Arc<Self>, mut tx: CrossChainTransaction) {
        if self.source_should_fail() {
            if let Err(e) = tx.fail_source() {
                error!("Failed to mark source of {} as failed: {}", tx.id, e);
                return;
            }
            warn!("Source transaction for message {} failed", tx.id);
            self.apply(&tx);
            self.events.publish(
                "Source Transaction Failed",
                "Your cross-chain message could not be confirmed on the source chain",
                NotificationKind::Destructive,
                Some(&tx.id),
            );
            return;
        }

        if let Err(e) = tx.confirm_source(generate_tx_hash()) {
            error!("Failed to confirm source of {}: {}", tx.id, e);
            return;
        }
        info!("Source transaction confirmed for message {}", tx.id);
        self.apply(&tx);

        self.schedule_destination(tx);
    }

    fn settle_destination(&self, mut tx: CrossChainTransaction) {
        if let Err(e) = tx.confirm_destination(generate_tx_hash()) {
            error!("Failed to confirm destination of {}: {}", tx.id, e);
            return;
        }
        info!("Message {} delivered to chain {}", tx.id, tx.destination_chain_id);
        self.apply(&tx);

        self.events.publish(
            "Message Successfully Delivered",
            "Your cross-chain message has been successfully delivered to the destination chain",
            NotificationKind::Default,
            Some(&tx.id),
        );
    }
}
