use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 指派状态
///
/// 生命周期：pending → accepted → started → (paused ↔ started)* →
/// completed | cancelled。completed 与 cancelled 为终态。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AssignmentStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "ACCEPTED")]
    Accepted,
    #[serde(rename = "STARTED")]
    Started,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl AssignmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AssignmentStatus::Completed | AssignmentStatus::Cancelled
        )
    }
}

/// 指派记录：一个工单与一个操作员在一段时间内的绑定
///
/// 在其生命周期内独占工单与操作员之间的绑定关系；改派时旧记录
/// 通过 `superseded_by` 指向新记录，新记录通过 `reassigned_from` 回链。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub work_item_id: String,
    pub operator_id: String,
    /// 发起指派的主体：班组长 id 或队列工作者标识
    pub assigned_by: String,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_quantity: u32,
    pub rejected_quantity: u32,
    pub quality_score: Option<f64>,
    pub cancel_reason: Option<String>,
    /// 改派产生的后继指派 id
    pub superseded_by: Option<String>,
    /// 本记录由哪条指派改派而来
    pub reassigned_from: Option<String>,
}

impl Assignment {
    pub fn new(
        id: impl Into<String>,
        work_item_id: impl Into<String>,
        operator_id: impl Into<String>,
        assigned_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            work_item_id: work_item_id.into(),
            operator_id: operator_id.into(),
            assigned_by: assigned_by.into(),
            status: AssignmentStatus::Pending,
            assigned_at: now,
            started_at: None,
            completed_at: None,
            completed_quantity: 0,
            rejected_quantity: 0,
            quality_score: None,
            cancel_reason: None,
            superseded_by: None,
            reassigned_from: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 标记开工，重复调用不覆盖首次开工时间
    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        self.status = AssignmentStatus::Started;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    pub fn mark_paused(&mut self) {
        self.status = AssignmentStatus::Paused;
    }

    /// 标记完工并记录最终数量与质量分
    pub fn mark_completed(
        &mut self,
        completed_quantity: u32,
        rejected_quantity: u32,
        quality_score: f64,
        now: DateTime<Utc>,
    ) {
        self.status = AssignmentStatus::Completed;
        self.completed_quantity = completed_quantity;
        self.rejected_quantity = rejected_quantity;
        self.quality_score = Some(quality_score);
        self.completed_at = Some(now);
    }

    /// 标记取消并记录原因
    pub fn mark_cancelled(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = AssignmentStatus::Cancelled;
        self.cancel_reason = Some(reason.into());
        self.completed_at = Some(now);
    }

    /// 从指派到结束的时长（分钟）
    pub fn elapsed_minutes(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.assigned_at).num_minutes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let now = Utc::now();
        let mut a = Assignment::new("a-1", "wi-1", "op-1", "sup-1", now);
        assert_eq!(a.status, AssignmentStatus::Pending);
        assert!(!a.is_terminal());

        a.mark_started(now);
        let first_start = a.started_at;
        a.mark_paused();
        a.mark_started(now + chrono::Duration::minutes(5));
        // 暂停后复工不覆盖首次开工时间
        assert_eq!(a.started_at, first_start);

        a.mark_completed(48, 2, 96.0, now + chrono::Duration::minutes(90));
        assert!(a.is_terminal());
        assert_eq!(a.completed_quantity, 48);
        assert_eq!(a.elapsed_minutes(), Some(90));
    }

    #[test]
    fn test_cancel_records_reason() {
        let now = Utc::now();
        let mut a = Assignment::new("a-1", "wi-1", "op-1", "sup-1", now);
        a.mark_cancelled("改派给 op-2", now);
        assert_eq!(a.status, AssignmentStatus::Cancelled);
        assert_eq!(a.cancel_reason.as_deref(), Some("改派给 op-2"));
    }
}
