//! 延迟任务调度器
//!
//! 每个任务以 (交易 id, 阶段) 标识，可以单独查询和取消。任务运行在构造时
//! 捕获的 tokio runtime 上，测试中暂停时钟即可确定性地推进虚拟时间。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use log::debug;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Source,
    Destination,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub tx_id: String,
    pub stage: Stage,
}

impl TaskKey {
    pub fn new(tx_id: &str, stage: Stage) -> Self {
        Self {
            tx_id: tx_id.to_string(),
            stage,
        }
    }
}

type TaskMap = Arc<Mutex<HashMap<TaskKey, (u64, AbortHandle)>>>;

pub struct Scheduler {
    runtime: Handle,
    tasks: TaskMap,
    next_seq: AtomicU64,
}

impl Scheduler {
    /// 必须在 tokio runtime 内调用
    pub fn new() -> Result<Self, Error> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("Scheduler requires a tokio runtime: {}", e)))?;
        Ok(Self {
            runtime,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_seq: AtomicU64::new(0),
        })
    }

    /// 在 `delay` 之后执行 `work`。同一个 key 重复调度时旧任务会被取消。
    ///
    /// `work` 是同步闭包，执行期间不会让出，调用方可以在其中完成完整的读-改-写。
    pub fn schedule<F>(&self, key: TaskKey, delay: Duration, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // 持锁期间 spawn 并登记，任务结束时的移除一定发生在登记之后
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.tasks);
        let task_key = key.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut tasks = registry.lock().unwrap_or_else(PoisonError::into_inner);
                // 已被同 key 的新任务替换时不能删掉新任务的登记
                if tasks.get(&task_key).map_or(false, |(s, _)| *s == seq) {
                    tasks.remove(&task_key);
                }
            }
            work();
        });

        debug!("Scheduled {:?} for {} in {:?}", key.stage, key.tx_id, delay);
        if let Some((_, previous)) = tasks.insert(key, (seq, handle.abort_handle())) {
            previous.abort();
        }
    }

    pub fn is_scheduled(&self, key: &TaskKey) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// 取消某笔交易所有未执行的任务，返回取消的数量
    pub fn cancel(&self, tx_id: &str) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let keys: Vec<TaskKey> = tasks.keys().filter(|k| k.tx_id == tx_id).cloned().collect();
        for key in &keys {
            if let Some((_, handle)) = tasks.remove(key) {
                handle.abort();
            }
        }
        keys.len()
    }

    pub fn cancel_all(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let count = tasks.len();
        for (_, (_, handle)) in tasks.drain() {
            handle.abort();
        }
        count
    }
}
