//! 指派请求队列
//!
//! 操作员自助请求的持久化优先级队列。请求文档本身就是队列元素，
//! 排序在读取时按实时优先级计算，不维护单独的索引结构。所有状态
//! 迁移都通过事务内的读改写完成，claim 即 compare-and-swap，
//! 多个工作者实例并发扫描也不会重复处理同一请求。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shopfloor_core::config::QueueConfig;
use shopfloor_core::errors::{SchedulingError, SchedulingResult};
use shopfloor_core::models::{
    AssignmentRequest, AuditAction, AuditRecord, EnqueueReceipt, Operator, QueueStats,
    RequestStatus, RequestStatusView, WorkItem,
};
use shopfloor_core::traits::{
    read_doc, transact, write_doc, Clock, DocKey, DocumentStore, DocumentTxn,
};

use crate::assignment_service::append_audit;

/// 入队序号计数器文档
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueMeta {
    next_position: u64,
}

pub struct RequestQueue {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl RequestQueue {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: QueueConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// 提交自助指派请求
    ///
    /// 只做存在性与终态校验；资格与评分留到处理时基于最新状态
    /// 重新判定。优先级取工单紧急度为基础权重，随等待时长上浮。
    pub async fn enqueue(
        &self,
        work_item_id: &str,
        operator_id: &str,
        reason: Option<String>,
    ) -> SchedulingResult<EnqueueReceipt> {
        let now = self.clock.now();
        let request_id = Uuid::new_v4().to_string();
        let ttl_hours = self.config.request_ttl_hours;

        let request: AssignmentRequest = {
            let work_item_id = work_item_id.to_string();
            let operator_id = operator_id.to_string();
            let request_id = request_id.clone();
            transact(self.store.as_ref(), move |txn| {
                Box::pin(enqueue_in_txn(
                    txn,
                    request_id,
                    work_item_id,
                    operator_id,
                    reason,
                    ttl_hours,
                    now,
                ))
            })
            .await?
        };

        let pending_ahead = self
            .pending_requests()
            .await?
            .iter()
            .filter(|r| ranks_before(r, &request, now))
            .count() as u64;
        let batches = pending_ahead / self.config.max_concurrent_processing as u64 + 1;

        info!(
            request_id = %request.id,
            work_item_id = %request.work_item_id,
            operator_id = %request.operator_id,
            queue_position = request.queue_position,
            priority_score = request.priority_score,
            "指派请求已入队"
        );
        Ok(EnqueueReceipt {
            request_id: request.id,
            queue_position: request.queue_position,
            estimated_processing_seconds: batches * self.config.tick_seconds,
        })
    }

    /// 带外撤销请求，不执行指派逻辑
    ///
    /// 只能撤销待处理的请求；处理中的请求需等本轮结束。
    pub async fn dequeue(
        &self,
        request_id: &str,
        reason: &str,
    ) -> SchedulingResult<AssignmentRequest> {
        let now = self.clock.now();
        let request_id_owned = request_id.to_string();
        let reason = reason.to_string();
        let request: AssignmentRequest = transact(self.store.as_ref(), move |txn| {
            Box::pin(dequeue_in_txn(txn, request_id_owned, reason, now))
        })
        .await?;
        info!(request_id = %request.id, "指派请求已撤销");
        Ok(request)
    }

    /// 查询请求状态与当前队列名次
    pub async fn status(&self, request_id: &str) -> SchedulingResult<RequestStatusView> {
        let request = self.load_request(request_id).await?;
        let now = self.clock.now();
        let position = if request.status == RequestStatus::Pending {
            let ahead = self
                .pending_requests()
                .await?
                .iter()
                .filter(|r| r.id != request.id && ranks_before(r, &request, now))
                .count() as u64;
            Some(ahead + 1)
        } else {
            None
        };
        Ok(RequestStatusView {
            position,
            status: request.status,
            attempts: request.attempts,
            last_failure: request.last_failure,
        })
    }

    /// 队列运行统计
    pub async fn stats(&self) -> SchedulingResult<QueueStats> {
        let requests = self.load_all().await?;
        let mut stats = QueueStats::default();
        let mut processing_times_ms: Vec<f64> = Vec::new();

        for request in &requests {
            match request.status {
                RequestStatus::Pending => stats.pending += 1,
                RequestStatus::Processing => stats.processing += 1,
                RequestStatus::Approved => stats.completed += 1,
                RequestStatus::Rejected | RequestStatus::Failed => stats.failed += 1,
                RequestStatus::Expired => stats.expired += 1,
            }
            if let (Some(claimed), Some(resolved)) = (request.claimed_at, request.resolved_at) {
                processing_times_ms.push((resolved - claimed).num_milliseconds() as f64);
            }
        }

        if !processing_times_ms.is_empty() {
            stats.avg_processing_time_ms =
                processing_times_ms.iter().sum::<f64>() / processing_times_ms.len() as f64;
        }
        let resolved = stats.completed + stats.failed;
        if resolved > 0 {
            stats.success_rate_pct = stats.completed as f64 / resolved as f64 * 100.0;
        }
        Ok(stats)
    }

    /// 本轮可处理的请求，按实时优先级降序、入队序号升序
    pub async fn due_requests(&self, now: DateTime<Utc>) -> SchedulingResult<Vec<AssignmentRequest>> {
        let mut due: Vec<AssignmentRequest> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| r.is_due(now))
            .collect();
        due.sort_by(|a, b| {
            b.effective_priority(now)
                .total_cmp(&a.effective_priority(now))
                .then_with(|| a.queue_position.cmp(&b.queue_position))
        });
        Ok(due)
    }

    /// 认领请求（CAS）：pending 且到期才迁移到 processing
    ///
    /// 竞争失败（已被其他工作者认领或状态已变化）返回 None。
    pub async fn claim(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> SchedulingResult<Option<AssignmentRequest>> {
        let request_id = request_id.to_string();
        transact(self.store.as_ref(), move |txn| {
            Box::pin(async move {
                let key = DocKey::request(&request_id);
                let mut request: AssignmentRequest = match read_doc(txn, &key).await? {
                    Some(r) => r,
                    None => return Ok(Value::Null),
                };
                if !request.is_due(now) {
                    return Ok(Value::Null);
                }
                request.status = RequestStatus::Processing;
                request.claimed_at = Some(now);
                write_doc(txn, &key, &request).await?;
                Ok(serde_json::to_value(&request)?)
            })
        })
        .await
    }

    /// 请求处理成功，关联产生的指派
    ///
    /// 只对处理中的请求生效：认领后的尝试必须由认领者落定结果，
    /// 其他状态说明请求已被并发改写，落定失败。
    pub async fn resolve_approved(
        &self,
        request_id: &str,
        assignment_id: &str,
        now: DateTime<Utc>,
    ) -> SchedulingResult<()> {
        let request_id = request_id.to_string();
        let assignment_id = assignment_id.to_string();
        transact(self.store.as_ref(), move |txn| {
            Box::pin(async move {
                let key = DocKey::request(&request_id);
                let mut request: AssignmentRequest =
                    read_doc(txn, &key)
                        .await?
                        .ok_or_else(|| SchedulingError::NotFound {
                            kind: "指派请求",
                            id: request_id.clone(),
                        })?;
                if request.status != RequestStatus::Processing {
                    return Err(SchedulingError::Validation(format!(
                        "请求 {request_id} 不在处理中，无法落定批准结果"
                    )));
                }
                request.status = RequestStatus::Approved;
                request.assignment_id = Some(assignment_id.clone());
                request.resolved_at = Some(now);
                write_doc(txn, &key, &request).await?;
                append_audit(
                    txn,
                    AuditRecord::new(
                        Uuid::new_v4().to_string(),
                        AuditAction::RequestResolved,
                        "queue-worker",
                        format!("请求 {request_id} 批准，产生指派 {assignment_id}"),
                        now,
                    )
                    .with_work_item(&request.work_item_id)
                    .with_operator(&request.operator_id)
                    .with_assignment(&assignment_id),
                )
                .await;
                Ok(Value::Null)
            })
        })
        .await
    }

    /// 请求因终态原因被拒绝（资格不符、工单已被指派等），不再重试
    pub async fn resolve_rejected(
        &self,
        request_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> SchedulingResult<()> {
        let request_id = request_id.to_string();
        let reason = reason.to_string();
        transact(self.store.as_ref(), move |txn| {
            Box::pin(async move {
                let key = DocKey::request(&request_id);
                let mut request: AssignmentRequest =
                    read_doc(txn, &key)
                        .await?
                        .ok_or_else(|| SchedulingError::NotFound {
                            kind: "指派请求",
                            id: request_id.clone(),
                        })?;
                if request.status != RequestStatus::Processing {
                    return Err(SchedulingError::Validation(format!(
                        "请求 {request_id} 不在处理中，无法落定拒绝结果"
                    )));
                }
                request.status = RequestStatus::Rejected;
                request.last_failure = Some(reason.clone());
                request.resolved_at = Some(now);
                write_doc(txn, &key, &request).await?;
                append_audit(
                    txn,
                    AuditRecord::new(
                        Uuid::new_v4().to_string(),
                        AuditAction::RequestResolved,
                        "queue-worker",
                        format!("请求 {request_id} 被拒绝：{reason}"),
                        now,
                    )
                    .with_work_item(&request.work_item_id)
                    .with_operator(&request.operator_id),
                )
                .await;
                Ok(Value::Null)
            })
        })
        .await
    }

    /// 记录一次可重试失败
    ///
    /// 尝试次数未耗尽时回到 pending 并按指数退避设定下次处理时间
    /// （`base * multiplier^attempts` 加非负抖动）；耗尽后置为 failed，
    /// 永不再试。返回迁移后的状态。
    pub async fn record_failure(
        &self,
        request_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> SchedulingResult<RequestStatus> {
        let request_id = request_id.to_string();
        let reason = reason.to_string();
        let max_attempts = self.config.max_retry_attempts;
        let base_seconds = self.config.base_retry_interval_seconds;
        let multiplier = self.config.backoff_multiplier;
        let jitter_factor = self.config.jitter_factor;

        transact(self.store.as_ref(), move |txn| {
            Box::pin(async move {
                let key = DocKey::request(&request_id);
                let mut request: AssignmentRequest =
                    read_doc(txn, &key)
                        .await?
                        .ok_or_else(|| SchedulingError::NotFound {
                            kind: "指派请求",
                            id: request_id.clone(),
                        })?;
                if request.status != RequestStatus::Processing {
                    return Err(SchedulingError::Validation(format!(
                        "请求 {request_id} 不在处理中，无法记录失败"
                    )));
                }
                request.attempts += 1;
                request.last_failure = Some(reason.clone());
                request.claimed_at = None;

                if request.attempts >= max_attempts {
                    request.status = RequestStatus::Failed;
                    request.resolved_at = Some(now);
                    warn!(
                        request_id = %request.id,
                        attempts = request.attempts,
                        "请求重试次数耗尽，置为失败: {reason}"
                    );
                } else {
                    let delay =
                        backoff_delay(base_seconds, multiplier, jitter_factor, request.attempts);
                    request.status = RequestStatus::Pending;
                    request.next_attempt_at = Some(now + delay);
                    debug!(
                        request_id = %request.id,
                        attempts = request.attempts,
                        delay_seconds = delay.num_seconds(),
                        "请求退避重试: {reason}"
                    );
                }
                write_doc(txn, &key, &request).await?;
                Ok(serde_json::to_value(request.status)?)
            })
        })
        .await
    }

    /// 把超过 TTL 的待处理请求置为过期，返回过期数量
    ///
    /// 过期独立于重试计数：一个还有重试余量的请求到了 TTL 同样过期。
    /// 已认领的请求不在此列，由滞留回收兜底。
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> SchedulingResult<u64> {
        let overdue: Vec<String> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| r.is_expired(now))
            .map(|r| r.id)
            .collect();

        let mut expired = 0u64;
        for request_id in overdue {
            let id = request_id.clone();
            // 事务内重新判定，避免与并发处理竞争
            let changed: bool = transact(self.store.as_ref(), move |txn| {
                Box::pin(async move {
                    let key = DocKey::request(&id);
                    let mut request: AssignmentRequest = match read_doc(txn, &key).await? {
                        Some(r) => r,
                        None => return Ok(Value::Bool(false)),
                    };
                    if !request.is_expired(now) {
                        return Ok(Value::Bool(false));
                    }
                    request.status = RequestStatus::Expired;
                    request.resolved_at = Some(now);
                    write_doc(txn, &key, &request).await?;
                    Ok(Value::Bool(true))
                })
            })
            .await?;
            if changed {
                info!(request_id = %request_id, "指派请求已过期");
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// 回收失联的 processing 请求
    ///
    /// 工作者在认领后崩溃会把请求滞留在 processing；滞留超过阈值的
    /// 请求回到 pending 立即重新可选，不消耗重试次数。
    pub async fn recover_stale_claims(&self, now: DateTime<Utc>) -> SchedulingResult<u64> {
        let timeout = Duration::seconds(self.config.stale_claim_timeout_seconds);
        let stale: Vec<String> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| {
                r.status == RequestStatus::Processing
                    && r.claimed_at.map(|t| now - t >= timeout).unwrap_or(true)
            })
            .map(|r| r.id)
            .collect();

        let mut recovered = 0u64;
        for request_id in stale {
            let id = request_id.clone();
            let changed: bool = transact(self.store.as_ref(), move |txn| {
                Box::pin(async move {
                    let key = DocKey::request(&id);
                    let mut request: AssignmentRequest = match read_doc(txn, &key).await? {
                        Some(r) => r,
                        None => return Ok(Value::Bool(false)),
                    };
                    let is_stale = request.status == RequestStatus::Processing
                        && request.claimed_at.map(|t| now - t >= timeout).unwrap_or(true);
                    if !is_stale {
                        return Ok(Value::Bool(false));
                    }
                    request.status = RequestStatus::Pending;
                    request.claimed_at = None;
                    request.next_attempt_at = Some(now);
                    write_doc(txn, &key, &request).await?;
                    Ok(Value::Bool(true))
                })
            })
            .await?;
            if changed {
                warn!(request_id = %request_id, "回收失联的处理中请求");
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn load_request(&self, request_id: &str) -> SchedulingResult<AssignmentRequest> {
        let value = self
            .store
            .get(&DocKey::request(request_id))
            .await?
            .ok_or_else(|| SchedulingError::NotFound {
                kind: "指派请求",
                id: request_id.to_string(),
            })?;
        Ok(serde_json::from_value(value)?)
    }

    async fn load_all(&self) -> SchedulingResult<Vec<AssignmentRequest>> {
        let entries = self.store.list_prefix(DocKey::REQUEST_PREFIX).await?;
        let mut requests = Vec::with_capacity(entries.len());
        for (_, value) in entries {
            requests.push(serde_json::from_value(value)?);
        }
        Ok(requests)
    }

    async fn pending_requests(&self) -> SchedulingResult<Vec<AssignmentRequest>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .collect())
    }
}

/// a 是否排在 b 之前（实时优先级降序，入队序号升序）
fn ranks_before(a: &AssignmentRequest, b: &AssignmentRequest, now: DateTime<Utc>) -> bool {
    let pa = a.effective_priority(now);
    let pb = b.effective_priority(now);
    if pa != pb {
        pa > pb
    } else {
        a.queue_position < b.queue_position
    }
}

/// 指数退避间隔：`base * multiplier^attempts` 加非负随机抖动
fn backoff_delay(base_seconds: u64, multiplier: f64, jitter_factor: f64, attempts: u32) -> Duration {
    let base = base_seconds as f64 * multiplier.powi(attempts as i32);
    let jitter = base * jitter_factor * rand::random::<f64>();
    Duration::milliseconds(((base + jitter) * 1000.0) as i64)
}

async fn enqueue_in_txn(
    txn: &mut dyn DocumentTxn,
    request_id: String,
    work_item_id: String,
    operator_id: String,
    reason: Option<String>,
    ttl_hours: i64,
    now: DateTime<Utc>,
) -> SchedulingResult<Value> {
    let item: WorkItem = read_doc(txn, &DocKey::work_item(&work_item_id))
        .await?
        .ok_or_else(|| SchedulingError::NotFound {
            kind: "工单",
            id: work_item_id.clone(),
        })?;
    if item.status.is_terminal() {
        return Err(SchedulingError::Validation(format!(
            "工单 {work_item_id} 已处于终态，不能申请指派"
        )));
    }
    // 操作员存在性校验；资格留到处理时重新判定
    read_doc::<Operator>(txn, &DocKey::operator(&operator_id))
        .await?
        .ok_or_else(|| SchedulingError::NotFound {
            kind: "操作员",
            id: operator_id.clone(),
        })?;

    let meta_key = DocKey::queue_meta();
    let mut meta: QueueMeta = read_doc(txn, &meta_key).await?.unwrap_or_default();
    meta.next_position += 1;
    let position = meta.next_position;

    let mut request = AssignmentRequest::new(
        &request_id,
        &work_item_id,
        &operator_id,
        item.urgency,
        position,
        ttl_hours,
        now,
    );
    request.reason = reason;

    write_doc(txn, &meta_key, &meta).await?;
    write_doc(txn, &DocKey::request(&request_id), &request).await?;
    append_audit(
        txn,
        AuditRecord::new(
            Uuid::new_v4().to_string(),
            AuditAction::RequestEnqueued,
            &operator_id,
            format!("操作员 {operator_id} 申请指派工单 {work_item_id}"),
            now,
        )
        .with_work_item(&work_item_id)
        .with_operator(&operator_id),
    )
    .await;

    Ok(serde_json::to_value(&request)?)
}

async fn dequeue_in_txn(
    txn: &mut dyn DocumentTxn,
    request_id: String,
    reason: String,
    now: DateTime<Utc>,
) -> SchedulingResult<Value> {
    let key = DocKey::request(&request_id);
    let mut request: AssignmentRequest =
        read_doc(txn, &key)
            .await?
            .ok_or_else(|| SchedulingError::NotFound {
                kind: "指派请求",
                id: request_id.clone(),
            })?;
    match request.status {
        RequestStatus::Pending => {
            request.status = RequestStatus::Rejected;
            request.last_failure = Some(reason.clone());
            request.resolved_at = Some(now);
        }
        RequestStatus::Processing => {
            return Err(SchedulingError::Validation(format!(
                "请求 {request_id} 正在处理中，稍后再撤销"
            )));
        }
        status => {
            return Err(SchedulingError::Validation(format!(
                "请求 {request_id} 已处于终态 ({status:?})"
            )));
        }
    }
    write_doc(txn, &key, &request).await?;
    append_audit(
        txn,
        AuditRecord::new(
            Uuid::new_v4().to_string(),
            AuditAction::RequestResolved,
            &request.operator_id,
            format!("请求 {request_id} 带外撤销：{reason}"),
            now,
        )
        .with_work_item(&request.work_item_id)
        .with_operator(&request.operator_id),
    )
    .await;
    Ok(serde_json::to_value(&request)?)
}
