use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::SchedulingResult;

/// 通知类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationKind {
    #[serde(rename = "WORK_ASSIGNED")]
    WorkAssigned,
    #[serde(rename = "WORK_REASSIGNED")]
    WorkReassigned,
    #[serde(rename = "REQUEST_RESOLVED")]
    RequestResolved,
}

/// 通知消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub recipient: String,
    pub payload: Value,
}

/// 通知分发端口
///
/// fire-and-forget 语义：在指派事务提交之后调用，分发失败只记录
/// 日志，绝不回滚已提交的指派。
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn notify(&self, notification: Notification) -> SchedulingResult<()>;
}
