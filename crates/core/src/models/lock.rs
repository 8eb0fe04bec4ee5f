use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 分布式锁文档
///
/// 针对单个逻辑资源（工单 id 或指派 id）的限时独占租约，随获取创建、
/// 随释放删除；持有者崩溃后由 TTL 到期自动回收。建议性锁，不做全局锁。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedLock {
    pub resource_id: String,
    pub lock_id: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DistributedLock {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// 距离到期的剩余毫秒数，已到期时为 0
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_milliseconds().max(0)
    }
}

/// 成功获取锁后的凭据，释放时校验 lock_id 防止误删他人的锁
#[derive(Debug, Clone)]
pub struct LockGrant {
    pub resource_id: String,
    pub lock_id: String,
    pub holder: String,
}
