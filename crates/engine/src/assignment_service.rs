//! 指派事务服务
//!
//! assign / complete / reassign 三个核心操作的实现。每个操作都在
//! 工单粒度的分布式锁保护下，以一次存储事务完成全部文档变更：
//! 事务内任何一步失败，所有变更整体回滚。通知在事务提交之后分发，
//! 分发失败只记录日志，不影响已提交的结果。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use shopfloor_core::errors::{SchedulingError, SchedulingResult};
use shopfloor_core::models::{
    Assignment, AuditAction, AuditRecord, CompletionRecord, Operator, OperatorStatus,
    PerformanceHistory, WorkItem, WorkItemStatus,
};
use shopfloor_core::traits::{
    read_doc, transact, write_doc, Clock, DocKey, DocumentStore, DocumentTxn, Notification,
    NotificationDispatcher, NotificationKind,
};

use crate::eligibility::{check_item_assignable, check_operator_eligibility};
use crate::lock_manager::LockManager;

/// 滚动效率/质量的指数平滑系数，新样本占 0.2
const ROLLING_BLEND: f64 = 0.2;

pub struct AssignmentService {
    store: Arc<dyn DocumentStore>,
    locks: Arc<LockManager>,
    notifier: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
}

impl AssignmentService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        locks: Arc<LockManager>,
        notifier: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            locks,
            notifier,
            clock,
        }
    }

    /// 把工单指派给操作员
    ///
    /// 持工单锁执行：校验工单可指派、操作员合格，创建指派记录，
    /// 更新工单与操作员文档，写入审计。并发指派同一工单时只有
    /// 一方成功，另一方收到锁冲突或已指派错误。
    pub async fn assign(
        &self,
        work_item_id: &str,
        operator_id: &str,
        assigned_by: &str,
    ) -> SchedulingResult<Assignment> {
        let holder = format!("assign:{assigned_by}");
        let assignment: Assignment = self
            .locks
            .with_lock(work_item_id, &holder, || {
                let store = Arc::clone(&self.store);
                let now = self.clock.now();
                let work_item_id = work_item_id.to_string();
                let operator_id = operator_id.to_string();
                let assigned_by = assigned_by.to_string();
                async move {
                    transact(store.as_ref(), move |txn| {
                        Box::pin(assign_in_txn(
                            txn,
                            work_item_id,
                            operator_id,
                            assigned_by,
                            now,
                        ))
                    })
                    .await
                }
            })
            .await?;

        info!(
            work_item_id = %assignment.work_item_id,
            operator_id = %assignment.operator_id,
            assignment_id = %assignment.id,
            assigned_by = %assignment.assigned_by,
            "工单指派成功"
        );
        self.dispatch(Notification {
            kind: NotificationKind::WorkAssigned,
            recipient: assignment.operator_id.clone(),
            payload: json!({
                "assignment_id": assignment.id,
                "work_item_id": assignment.work_item_id,
            }),
        })
        .await;
        Ok(assignment)
    }

    /// 完工上报
    ///
    /// 由被指派的操作员发起。指派记录进入终态，工单累计完成数量，
    /// 达到目标数量即完结，否则余量回到待指派池；操作员释放容量并
    /// 更新滚动绩效。
    pub async fn complete(
        &self,
        assignment_id: &str,
        operator_id: &str,
        completed_quantity: u32,
        rejected_quantity: u32,
        quality_score: f64,
    ) -> SchedulingResult<Assignment> {
        if !(0.0..=100.0).contains(&quality_score) {
            return Err(SchedulingError::Validation(format!(
                "质量分必须在0-100之间: {quality_score}"
            )));
        }
        if completed_quantity == 0 && rejected_quantity == 0 {
            return Err(SchedulingError::Validation(
                "完工数量与不良数量不能同时为0".to_string(),
            ));
        }

        let work_item_id = self.work_item_of(assignment_id).await?;
        let holder = format!("complete:{operator_id}");
        let assignment: Assignment = self
            .locks
            .with_lock(&work_item_id, &holder, || {
                let store = Arc::clone(&self.store);
                let now = self.clock.now();
                let assignment_id = assignment_id.to_string();
                let operator_id = operator_id.to_string();
                async move {
                    transact(store.as_ref(), move |txn| {
                        Box::pin(complete_in_txn(
                            txn,
                            assignment_id,
                            operator_id,
                            completed_quantity,
                            rejected_quantity,
                            quality_score,
                            now,
                        ))
                    })
                    .await
                }
            })
            .await?;

        info!(
            assignment_id = %assignment.id,
            work_item_id = %assignment.work_item_id,
            operator_id = %assignment.operator_id,
            completed_quantity,
            rejected_quantity,
            quality_score,
            "完工上报成功"
        );
        Ok(assignment)
    }

    /// 改派：把进行中的指派转给另一名操作员
    ///
    /// 旧指派记录取消并通过 `superseded_by` 指向新记录，新记录
    /// 通过 `reassigned_from` 回链，形成完整的改派链。新操作员
    /// 必须通过与直接指派相同的资格校验。
    pub async fn reassign(
        &self,
        assignment_id: &str,
        new_operator_id: &str,
        assigned_by: &str,
        reason: &str,
    ) -> SchedulingResult<Assignment> {
        let work_item_id = self.work_item_of(assignment_id).await?;
        let holder = format!("reassign:{assigned_by}");
        let replacement: Assignment = self
            .locks
            .with_lock(&work_item_id, &holder, || {
                let store = Arc::clone(&self.store);
                let now = self.clock.now();
                let assignment_id = assignment_id.to_string();
                let new_operator_id = new_operator_id.to_string();
                let assigned_by = assigned_by.to_string();
                let reason = reason.to_string();
                async move {
                    transact(store.as_ref(), move |txn| {
                        Box::pin(reassign_in_txn(
                            txn,
                            assignment_id,
                            new_operator_id,
                            assigned_by,
                            reason,
                            now,
                        ))
                    })
                    .await
                }
            })
            .await?;

        info!(
            old_assignment_id = %assignment_id,
            new_assignment_id = %replacement.id,
            work_item_id = %replacement.work_item_id,
            new_operator_id = %replacement.operator_id,
            "工单改派成功"
        );
        self.dispatch(Notification {
            kind: NotificationKind::WorkReassigned,
            recipient: replacement.operator_id.clone(),
            payload: json!({
                "assignment_id": replacement.id,
                "work_item_id": replacement.work_item_id,
                "reassigned_from": replacement.reassigned_from,
            }),
        })
        .await;
        Ok(replacement)
    }

    /// 解析指派所属的工单 id，用于确定锁粒度
    async fn work_item_of(&self, assignment_id: &str) -> SchedulingResult<String> {
        let key = DocKey::assignment(assignment_id);
        let value = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| SchedulingError::NotFound {
                kind: "指派",
                id: assignment_id.to_string(),
            })?;
        let assignment: Assignment = serde_json::from_value(value)?;
        Ok(assignment.work_item_id)
    }

    /// 事务提交后分发通知，失败只记日志
    async fn dispatch(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(notification).await {
            warn!("通知分发失败，不影响已提交的指派: {e}");
        }
    }
}

async fn assign_in_txn(
    txn: &mut dyn DocumentTxn,
    work_item_id: String,
    operator_id: String,
    assigned_by: String,
    now: DateTime<Utc>,
) -> SchedulingResult<Value> {
    let item_key = DocKey::work_item(&work_item_id);
    let mut item: WorkItem =
        read_doc(txn, &item_key)
            .await?
            .ok_or_else(|| SchedulingError::NotFound {
                kind: "工单",
                id: work_item_id.clone(),
            })?;
    check_item_assignable(&item)?;

    let op_key = DocKey::operator(&operator_id);
    let mut operator: Operator =
        read_doc(txn, &op_key)
            .await?
            .ok_or_else(|| SchedulingError::NotFound {
                kind: "操作员",
                id: operator_id.clone(),
            })?;
    check_operator_eligibility(&item, &operator)?;

    let assignment = Assignment::new(
        Uuid::new_v4().to_string(),
        &work_item_id,
        &operator_id,
        &assigned_by,
        now,
    );

    item.status = WorkItemStatus::Assigned;
    item.assigned_operator_id = Some(operator_id.clone());
    item.updated_at = now;

    operator.current_assignments += 1;
    if operator.status == OperatorStatus::Idle {
        operator.status = OperatorStatus::Working;
    }
    operator.updated_at = now;

    write_doc(txn, &item_key, &item).await?;
    write_doc(txn, &op_key, &operator).await?;
    write_doc(txn, &DocKey::assignment(&assignment.id), &assignment).await?;

    append_audit(
        txn,
        AuditRecord::new(
            Uuid::new_v4().to_string(),
            AuditAction::Assign,
            &assigned_by,
            format!("工单 {work_item_id} 指派给操作员 {operator_id}"),
            now,
        )
        .with_work_item(&work_item_id)
        .with_operator(&operator_id)
        .with_assignment(&assignment.id),
    )
    .await;

    Ok(serde_json::to_value(&assignment)?)
}

#[allow(clippy::too_many_arguments)]
async fn complete_in_txn(
    txn: &mut dyn DocumentTxn,
    assignment_id: String,
    operator_id: String,
    completed_quantity: u32,
    rejected_quantity: u32,
    quality_score: f64,
    now: DateTime<Utc>,
) -> SchedulingResult<Value> {
    let assignment_key = DocKey::assignment(&assignment_id);
    let mut assignment: Assignment = read_doc(txn, &assignment_key)
        .await?
        .ok_or_else(|| SchedulingError::NotFound {
            kind: "指派",
            id: assignment_id.clone(),
        })?;
    if assignment.is_terminal() {
        return Err(SchedulingError::Validation(format!(
            "指派 {assignment_id} 已处于终态 ({:?})",
            assignment.status
        )));
    }
    if assignment.operator_id != operator_id {
        return Err(SchedulingError::Validation(format!(
            "指派 {assignment_id} 属于操作员 {}，{operator_id} 无权完工",
            assignment.operator_id
        )));
    }

    let item_key = DocKey::work_item(&assignment.work_item_id);
    let mut item: WorkItem =
        read_doc(txn, &item_key)
            .await?
            .ok_or_else(|| SchedulingError::NotFound {
                kind: "工单",
                id: assignment.work_item_id.clone(),
            })?;
    let op_key = DocKey::operator(&operator_id);
    let mut operator: Operator =
        read_doc(txn, &op_key)
            .await?
            .ok_or_else(|| SchedulingError::NotFound {
                kind: "操作员",
                id: operator_id.clone(),
            })?;

    assignment.mark_completed(completed_quantity, rejected_quantity, quality_score, now);
    let elapsed_minutes = assignment.elapsed_minutes().unwrap_or(0).max(0);

    // 本批次效率比：标准工时按完成占比折算，与实际用时对比
    let expected_minutes = item.estimated_minutes as f64 * completed_quantity as f64
        / item.target_quantity.max(1) as f64;
    let batch_efficiency =
        (expected_minutes / (elapsed_minutes as f64).max(1.0)).clamp(0.1, 3.0);

    item.completed_quantity += completed_quantity;
    item.rejected_quantity += rejected_quantity;
    item.assigned_operator_id = None;
    if item.completed_quantity >= item.target_quantity {
        item.status = WorkItemStatus::Completed;
    } else {
        // 部分完工：余量回到待指派池
        item.status = WorkItemStatus::Pending;
    }
    item.updated_at = now;

    operator.current_assignments = operator.current_assignments.saturating_sub(1);
    operator.completed_count += 1;
    operator.working_minutes += elapsed_minutes as u64;
    operator.efficiency_ratio =
        operator.efficiency_ratio * (1.0 - ROLLING_BLEND) + batch_efficiency * ROLLING_BLEND;
    operator.quality_pct =
        operator.quality_pct * (1.0 - ROLLING_BLEND) + quality_score * ROLLING_BLEND;
    if operator.current_assignments == 0 && operator.status == OperatorStatus::Working {
        operator.status = OperatorStatus::Idle;
    }
    operator.updated_at = now;

    let history_key = DocKey::history(&operator_id);
    let mut history: PerformanceHistory = read_doc(txn, &history_key)
        .await?
        .unwrap_or_else(|| PerformanceHistory::new(&operator_id));
    history.push(CompletionRecord {
        assignment_id: assignment_id.clone(),
        machine: item.machine,
        operation: item.operation.clone(),
        completed_quantity,
        rejected_quantity,
        quality_score,
        efficiency_ratio: batch_efficiency,
        completed_at: now,
    });

    write_doc(txn, &assignment_key, &assignment).await?;
    write_doc(txn, &item_key, &item).await?;
    write_doc(txn, &op_key, &operator).await?;
    write_doc(txn, &history_key, &history).await?;

    append_audit(
        txn,
        AuditRecord::new(
            Uuid::new_v4().to_string(),
            AuditAction::Complete,
            &operator_id,
            format!(
                "指派 {assignment_id} 完工：完成 {completed_quantity}，不良 {rejected_quantity}，质量分 {quality_score}"
            ),
            now,
        )
        .with_work_item(&item.id)
        .with_operator(&operator_id)
        .with_assignment(&assignment_id),
    )
    .await;

    Ok(serde_json::to_value(&assignment)?)
}

async fn reassign_in_txn(
    txn: &mut dyn DocumentTxn,
    assignment_id: String,
    new_operator_id: String,
    assigned_by: String,
    reason: String,
    now: DateTime<Utc>,
) -> SchedulingResult<Value> {
    let old_key = DocKey::assignment(&assignment_id);
    let mut old_assignment: Assignment =
        read_doc(txn, &old_key)
            .await?
            .ok_or_else(|| SchedulingError::NotFound {
                kind: "指派",
                id: assignment_id.clone(),
            })?;
    if old_assignment.is_terminal() {
        return Err(SchedulingError::Validation(format!(
            "指派 {assignment_id} 已处于终态 ({:?})，不能改派",
            old_assignment.status
        )));
    }
    if old_assignment.operator_id == new_operator_id {
        return Err(SchedulingError::Validation(format!(
            "不能改派给当前操作员 {new_operator_id}"
        )));
    }

    let item_key = DocKey::work_item(&old_assignment.work_item_id);
    let mut item: WorkItem =
        read_doc(txn, &item_key)
            .await?
            .ok_or_else(|| SchedulingError::NotFound {
                kind: "工单",
                id: old_assignment.work_item_id.clone(),
            })?;
    let new_op_key = DocKey::operator(&new_operator_id);
    let mut new_operator: Operator =
        read_doc(txn, &new_op_key)
            .await?
            .ok_or_else(|| SchedulingError::NotFound {
                kind: "操作员",
                id: new_operator_id.clone(),
            })?;
    check_operator_eligibility(&item, &new_operator)?;

    let mut replacement = Assignment::new(
        Uuid::new_v4().to_string(),
        &old_assignment.work_item_id,
        &new_operator_id,
        &assigned_by,
        now,
    );
    replacement.reassigned_from = Some(assignment_id.clone());

    old_assignment.mark_cancelled(&reason, now);
    old_assignment.superseded_by = Some(replacement.id.clone());

    item.status = WorkItemStatus::Assigned;
    item.assigned_operator_id = Some(new_operator_id.clone());
    item.updated_at = now;

    new_operator.current_assignments += 1;
    if new_operator.status == OperatorStatus::Idle {
        new_operator.status = OperatorStatus::Working;
    }
    new_operator.updated_at = now;

    // 原操作员释放容量；文档缺失时跳过（容量不变式由指派路径维护）
    let old_op_key = DocKey::operator(&old_assignment.operator_id);
    if let Some(mut old_operator) = read_doc::<Operator>(txn, &old_op_key).await? {
        old_operator.current_assignments = old_operator.current_assignments.saturating_sub(1);
        if old_operator.current_assignments == 0
            && old_operator.status == OperatorStatus::Working
        {
            old_operator.status = OperatorStatus::Idle;
        }
        old_operator.updated_at = now;
        write_doc(txn, &old_op_key, &old_operator).await?;
    }

    write_doc(txn, &old_key, &old_assignment).await?;
    write_doc(txn, &item_key, &item).await?;
    write_doc(txn, &new_op_key, &new_operator).await?;
    write_doc(txn, &DocKey::assignment(&replacement.id), &replacement).await?;

    append_audit(
        txn,
        AuditRecord::new(
            Uuid::new_v4().to_string(),
            AuditAction::Reassign,
            &assigned_by,
            format!(
                "指派 {assignment_id} 由 {} 改派给 {new_operator_id}：{reason}",
                old_assignment.operator_id
            ),
            now,
        )
        .with_work_item(&item.id)
        .with_operator(&new_operator_id)
        .with_assignment(&replacement.id),
    )
    .await;

    Ok(serde_json::to_value(&replacement)?)
}

/// 在事务内追加审计记录，写入失败降级为告警
pub(crate) async fn append_audit(txn: &mut dyn DocumentTxn, record: AuditRecord) {
    let key = DocKey::audit(&record.id);
    if let Err(e) = write_doc(txn, &key, &record).await {
        warn!(action = ?record.action, "审计记录写入失败: {e}");
    }
}
