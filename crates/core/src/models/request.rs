use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::work_item::Urgency;

/// 指派请求状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "APPROVED")]
    Approved,
    #[serde(rename = "REJECTED")]
    Rejected,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "EXPIRED")]
    Expired,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Approved
                | RequestStatus::Rejected
                | RequestStatus::Failed
                | RequestStatus::Expired
        )
    }
}

/// 操作员自助指派请求
///
/// 对工单与操作员仅为弱引用（处理时重新查询），不拥有绑定关系。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRequest {
    pub id: String,
    pub work_item_id: String,
    pub operator_id: String,
    pub urgency: Urgency,
    pub reason: Option<String>,
    pub status: RequestStatus,
    /// 入队时刻的优先级快照，排序时以 `effective_priority` 重新计算
    pub priority_score: f64,
    /// 入队序号，优先级相同时先到先处理
    pub queue_position: u64,
    pub attempts: u32,
    pub last_failure: Option<String>,
    /// 退避重试的最早下次处理时间
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// 批准后产生的指派 id
    pub assignment_id: Option<String>,
}

impl AssignmentRequest {
    pub fn new(
        id: impl Into<String>,
        work_item_id: impl Into<String>,
        operator_id: impl Into<String>,
        urgency: Urgency,
        queue_position: u64,
        ttl_hours: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            work_item_id: work_item_id.into(),
            operator_id: operator_id.into(),
            urgency,
            reason: None,
            status: RequestStatus::Pending,
            priority_score: urgency.weight(),
            queue_position,
            attempts: 0,
            last_failure: None,
            next_attempt_at: None,
            requested_at: now,
            expires_at: now + Duration::hours(ttl_hours),
            claimed_at: None,
            resolved_at: None,
            assignment_id: None,
        }
    }

    /// 实时优先级：紧急度基础权重 + 等待时长加成（每小时 +2，封顶 50）
    ///
    /// 加成封顶保证紧急请求不被彻底压制，同时让低优先级的陈旧请求
    /// 最终浮出队首。
    pub fn effective_priority(&self, now: DateTime<Utc>) -> f64 {
        let hours_waiting = (now - self.requested_at).num_minutes() as f64 / 60.0;
        let age_bonus = (hours_waiting.max(0.0) * 2.0).min(50.0);
        self.urgency.weight() + age_bonus
    }

    /// 过期只针对待处理的请求；已认领的尝试必须跑到类型化结果，
    /// 失联的认领由滞留回收处理。
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == RequestStatus::Pending && now >= self.expires_at
    }

    /// 是否可在本轮 tick 被选中处理
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == RequestStatus::Pending
            && !self.is_expired(now)
            && self.next_attempt_at.map(|t| t <= now).unwrap_or(true)
    }
}

/// 队列运行统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub expired: u64,
    pub avg_processing_time_ms: f64,
    pub success_rate_pct: f64,
}

/// 入队回执
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueReceipt {
    pub request_id: String,
    pub queue_position: u64,
    pub estimated_processing_seconds: u64,
}

/// 请求状态查询视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStatusView {
    /// 在待处理队列中的名次（1 为队首），非待处理状态为 None
    pub position: Option<u64>,
    pub status: RequestStatus,
    pub attempts: u32,
    pub last_failure: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_bonus_is_capped() {
        let now = Utc::now();
        let req = AssignmentRequest::new("r-1", "wi-1", "op-1", Urgency::Low, 1, 72, now);
        // 刚入队：仅基础权重
        assert_eq!(req.effective_priority(now), 25.0);
        // 等待 10 小时：25 + 20
        assert_eq!(
            req.effective_priority(now + Duration::hours(10)),
            45.0
        );
        // 超长等待：加成封顶 50
        assert_eq!(
            req.effective_priority(now + Duration::hours(100)),
            75.0
        );
    }

    #[test]
    fn test_stale_low_outranks_fresh_medium() {
        let now = Utc::now();
        let old_low =
            AssignmentRequest::new("r-1", "wi-1", "op-1", Urgency::Low, 1, 72, now - Duration::hours(26));
        let fresh_medium = AssignmentRequest::new("r-2", "wi-2", "op-2", Urgency::Medium, 2, 72, now);
        // 等待超过 25 小时后，低优先级请求反超新入队的中优先级请求
        assert!(old_low.effective_priority(now) > fresh_medium.effective_priority(now));
    }

    #[test]
    fn test_expiry_and_due() {
        let now = Utc::now();
        let mut req = AssignmentRequest::new("r-1", "wi-1", "op-1", Urgency::High, 1, 24, now);
        assert!(req.is_due(now));
        assert!(req.is_expired(now + Duration::hours(24)));
        // 退避期内不可被选中
        req.next_attempt_at = Some(now + Duration::minutes(5));
        assert!(!req.is_due(now));
        assert!(req.is_due(now + Duration::minutes(5)));
        // 已认领的请求不过期，等滞留回收
        req.status = RequestStatus::Processing;
        assert!(!req.is_expired(now + Duration::hours(48)));
        // 终态请求不再过期
        req.status = RequestStatus::Approved;
        assert!(!req.is_expired(now + Duration::hours(48)));
    }
}
