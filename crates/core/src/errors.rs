use thiserror::Error;

/// 指派引擎错误类型定义
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("无效输入: {0}")]
    Validation(String),

    #[error("资源 {resource_id} 的锁被 {current_holder} 持有，建议 {retry_after_ms}ms 后重试")]
    LockConflict {
        resource_id: String,
        current_holder: String,
        retry_after_ms: i64,
    },

    #[error("工单 {work_item_id} 已被指派")]
    AlreadyAssigned { work_item_id: String },

    #[error("资格校验未通过: {reason}")]
    Ineligible { reason: EligibilityReason },

    #[error("{kind}未找到: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("存储暂时不可用: {0}")]
    TransientStore(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 资格校验失败的具体原因
///
/// `code()` 提供稳定的机器可读编码，供队列失败原因与外部调用方使用。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EligibilityReason {
    /// 操作员离线
    OperatorOffline,
    /// 当前指派数已达容量上限
    CapacityExceeded,
    /// 技能等级低于工单要求
    SkillMismatch,
    /// 机器类别不兼容
    MachineMismatch,
}

impl EligibilityReason {
    pub fn code(&self) -> &'static str {
        match self {
            EligibilityReason::OperatorOffline => "offline",
            EligibilityReason::CapacityExceeded => "capacity",
            EligibilityReason::SkillMismatch => "skill",
            EligibilityReason::MachineMismatch => "machine",
        }
    }
}

impl std::fmt::Display for EligibilityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let desc = match self {
            EligibilityReason::OperatorOffline => "操作员离线",
            EligibilityReason::CapacityExceeded => "操作员容量已满",
            EligibilityReason::SkillMismatch => "技能等级不足",
            EligibilityReason::MachineMismatch => "机器类别不兼容",
        };
        write!(f, "{desc} ({})", self.code())
    }
}

impl SchedulingError {
    /// 调用方是否可以在退避后重试
    ///
    /// 锁冲突与存储抖动可重试；校验类、资格类与未找到类错误是终态。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulingError::LockConflict { .. }
                | SchedulingError::TransientStore(_)
                | SchedulingError::Database(_)
        )
    }

    /// 锁冲突时携带的重试提示
    pub fn retry_after_ms(&self) -> Option<i64> {
        match self {
            SchedulingError::LockConflict { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// 统一的Result类型
pub type SchedulingResult<T> = std::result::Result<T, SchedulingError>;
