use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Default,
    Destructive,
}

/// 面向用户的提示消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub kind: NotificationKind,
    /// 关联的交易 id
    pub tx_id: Option<String>,
}

/// 通知总线。由调用方创建并注入引擎，订阅者各自持有 `Subscription`，
/// drop 即退订。
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Notification>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// 发布通知；没有订阅者时直接丢弃
    pub fn publish(
        &self,
        title: &str,
        description: &str,
        kind: NotificationKind,
        tx_id: Option<&str>,
    ) -> Notification {
        let notification = Notification {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            title: title.to_string(),
            description: description.to_string(),
            kind,
            tx_id: tx_id.map(str::to_string),
        };
        if self.sender.send(notification.clone()).is_err() {
            debug!("No subscribers for notification {:?}", notification.title);
        }
        notification
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<Notification>,
}

impl Subscription {
    /// 等待下一条通知；落后太多时跳过丢失的部分，总线关闭时返回 `None`
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Subscription lagged, skipped {} notifications", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.try_recv() {
                Ok(notification) => return Some(notification),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
