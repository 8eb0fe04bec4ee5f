use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use shopfloor_core::errors::SchedulingResult;
use shopfloor_core::traits::{Notification, NotificationDispatcher};

/// 日志通知分发器
///
/// 默认实现：把通知写入结构化日志，由外部系统（站内信、推送等）
/// 订阅消费。推送传输本身不在本系统范围内。
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn notify(&self, notification: Notification) -> SchedulingResult<()> {
        info!(
            kind = ?notification.kind,
            recipient = %notification.recipient,
            payload = %notification.payload,
            "分发通知"
        );
        Ok(())
    }
}

/// 记录型通知分发器，测试用
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Notification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> SchedulingResult<()> {
        self.sent.lock().await.push(notification);
        Ok(())
    }
}
