use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 审计动作类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditAction {
    #[serde(rename = "ASSIGN")]
    Assign,
    #[serde(rename = "COMPLETE")]
    Complete,
    #[serde(rename = "REASSIGN")]
    Reassign,
    #[serde(rename = "REQUEST_ENQUEUED")]
    RequestEnqueued,
    #[serde(rename = "REQUEST_RESOLVED")]
    RequestResolved,
}

/// 审计记录
///
/// 每次成功变更写入一条；审计写入失败不影响主操作结果。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub action: AuditAction,
    /// 触发者：班组长 id、操作员 id 或队列工作者标识
    pub actor: String,
    pub work_item_id: Option<String>,
    pub operator_id: Option<String>,
    pub assignment_id: Option<String>,
    pub detail: String,
    pub at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        id: impl Into<String>,
        action: AuditAction,
        actor: impl Into<String>,
        detail: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            action,
            actor: actor.into(),
            work_item_id: None,
            operator_id: None,
            assignment_id: None,
            detail: detail.into(),
            at,
        }
    }

    pub fn with_work_item(mut self, id: impl Into<String>) -> Self {
        self.work_item_id = Some(id.into());
        self
    }

    pub fn with_operator(mut self, id: impl Into<String>) -> Self {
        self.operator_id = Some(id.into());
        self
    }

    pub fn with_assignment(mut self, id: impl Into<String>) -> Self {
        self.assignment_id = Some(id.into());
        self
    }
}
