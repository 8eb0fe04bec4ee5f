//! 分布式锁管理器
//!
//! 基于文档存储的事务能力实现限时独占租约：获取锁即在一次事务内
//! 完成"读取-判活-写入"，冲突时返回带重试提示的错误。释放按
//! lock_id 校验，持有者崩溃后由 TTL 到期自动回收，不需要后台清理。

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use shopfloor_core::config::LockConfig;
use shopfloor_core::errors::{SchedulingError, SchedulingResult};
use shopfloor_core::models::{DistributedLock, LockGrant};
use shopfloor_core::traits::{
    read_doc, transact, write_doc, Clock, DocKey, DocumentStore, DocumentTxn,
};

pub struct LockManager {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: LockConfig,
}

impl LockManager {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: LockConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// 获取资源锁
    ///
    /// 同一资源已被未过期的锁持有时返回 [`SchedulingError::LockConflict`]，
    /// 其中 `retry_after_ms` 为现有租约的剩余毫秒数；已过期的锁直接回收。
    pub async fn acquire(&self, resource_id: &str, holder: &str) -> SchedulingResult<LockGrant> {
        let now = self.clock.now();
        let ttl = Duration::milliseconds(self.config.ttl_ms);
        let resource = resource_id.to_string();
        let owner = holder.to_string();
        let lock_id = Uuid::new_v4().to_string();

        let lock: DistributedLock = transact(self.store.as_ref(), move |txn| {
            Box::pin(acquire_in_txn(txn, resource, owner, lock_id, now, ttl))
        })
        .await?;

        debug!(
            resource_id = %lock.resource_id,
            holder = %lock.holder,
            expires_at = %lock.expires_at,
            "获取资源锁成功"
        );
        Ok(LockGrant {
            resource_id: lock.resource_id,
            lock_id: lock.lock_id,
            holder: lock.holder,
        })
    }

    /// 释放资源锁（幂等）
    ///
    /// 仅当存储中的锁与凭据的 lock_id 一致时删除；锁已过期被他人
    /// 重新获取、或已被删除时静默返回，绝不误删他人的租约。
    pub async fn release(&self, grant: &LockGrant) -> SchedulingResult<()> {
        let resource = grant.resource_id.clone();
        let lock_id = grant.lock_id.clone();

        transact::<(), _>(self.store.as_ref(), move |txn| {
            Box::pin(release_in_txn(txn, resource, lock_id))
        })
        .await
    }

    /// 在资源锁的保护下执行一段操作
    ///
    /// 无论操作成功与否都会尝试释放锁；释放失败只记录告警，
    /// 残留的租约由 TTL 到期回收。
    pub async fn with_lock<T, F, Fut>(
        &self,
        resource_id: &str,
        holder: &str,
        op: F,
    ) -> SchedulingResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SchedulingResult<T>>,
    {
        let grant = self.acquire(resource_id, holder).await?;
        let result = op().await;
        if let Err(release_err) = self.release(&grant).await {
            warn!(
                resource_id = %grant.resource_id,
                "释放资源锁失败，等待TTL回收: {release_err}"
            );
        }
        result
    }
}

async fn acquire_in_txn(
    txn: &mut dyn DocumentTxn,
    resource_id: String,
    holder: String,
    lock_id: String,
    now: DateTime<Utc>,
    ttl: Duration,
) -> SchedulingResult<Value> {
    let key = DocKey::lock(&resource_id);
    if let Some(existing) = read_doc::<DistributedLock>(txn, &key).await? {
        if !existing.is_expired(now) {
            return Err(SchedulingError::LockConflict {
                resource_id,
                retry_after_ms: existing.remaining_ms(now),
                current_holder: existing.holder,
            });
        }
        debug!(resource_id = %resource_id, stale_holder = %existing.holder, "回收已过期的锁");
    }

    let lock = DistributedLock {
        resource_id,
        lock_id,
        holder,
        acquired_at: now,
        expires_at: now + ttl,
    };
    write_doc(txn, &key, &lock).await?;
    Ok(serde_json::to_value(&lock)?)
}

async fn release_in_txn(
    txn: &mut dyn DocumentTxn,
    resource_id: String,
    lock_id: String,
) -> SchedulingResult<Value> {
    let key = DocKey::lock(&resource_id);
    if let Some(existing) = read_doc::<DistributedLock>(txn, &key).await? {
        if existing.lock_id == lock_id {
            txn.delete(&key).await?;
        }
    }
    Ok(Value::Null)
}
