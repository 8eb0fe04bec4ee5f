//! 队列工作者
//!
//! 周期扫描请求队列：先做过期与失联回收，再按实时优先级认领一批
//! 请求并发处理。每个请求基于最新的工单/操作员状态重新校验资格、
//! 重新评分，达到最低置信度后走与人工指派完全相同的事务路径。
//! 可重试失败退避后重回队列，终态失败立即拒绝。

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use shopfloor_core::config::QueueConfig;
use shopfloor_core::errors::SchedulingResult;
use shopfloor_core::models::{
    AssignmentRequest, Operator, PerformanceHistory, RequestStatus, WorkItem, WorkRequirements,
};
use shopfloor_core::traits::{Clock, DocKey, DocumentStore};

use crate::assignment_service::AssignmentService;
use crate::eligibility::{check_item_assignable, check_operator_eligibility};
use crate::queue::RequestQueue;
use crate::scoring::ScoringEngine;

/// 队列工作者在审计与指派记录中的触发者标识
const WORKER_ACTOR: &str = "queue-worker";

/// 单轮处理结果汇总
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub expired: u64,
    pub recovered: u64,
    pub approved: u64,
    pub rejected: u64,
    pub retried: u64,
    pub failed: u64,
}

impl TickSummary {
    pub fn processed(&self) -> u64 {
        self.approved + self.rejected + self.retried + self.failed
    }

    fn is_quiet(&self) -> bool {
        *self == TickSummary::default()
    }
}

/// 单个请求的处理结论
enum Outcome {
    Approved,
    Rejected,
    Retried,
    Failed,
    /// 存储层面的错误，留给下一轮重扫
    Errored,
}

pub struct QueueWorker {
    queue: Arc<RequestQueue>,
    assignments: Arc<AssignmentService>,
    scoring: Arc<ScoringEngine>,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<RequestQueue>,
        assignments: Arc<AssignmentService>,
        scoring: Arc<ScoringEngine>,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        Self {
            queue,
            assignments,
            scoring,
            store,
            clock,
            config,
        }
    }

    /// 周期运行直到关闭标志翻转
    ///
    /// 标志在启动前已翻转时立即退出，不执行任何轮次。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(self.config.tick_seconds));
        info!(
            tick_seconds = self.config.tick_seconds,
            max_concurrent = self.config.max_concurrent_processing,
            "队列工作者启动"
        );
        loop {
            tokio::select! {
                _ = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => {
                    info!("队列工作者收到关闭信号，停止扫描");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(summary) if summary.is_quiet() => {}
                        Ok(summary) => {
                            info!(
                                expired = summary.expired,
                                recovered = summary.recovered,
                                approved = summary.approved,
                                rejected = summary.rejected,
                                retried = summary.retried,
                                failed = summary.failed,
                                "队列处理轮次完成"
                            );
                        }
                        Err(e) => error!("队列处理轮次失败: {e}"),
                    }
                }
            }
        }
    }

    /// 执行一轮扫描与处理
    pub async fn tick(&self) -> SchedulingResult<TickSummary> {
        let now = self.clock.now();
        let mut summary = TickSummary {
            expired: self.queue.expire_overdue(now).await?,
            recovered: self.queue.recover_stale_claims(now).await?,
            ..TickSummary::default()
        };

        // 逐个 CAS 认领，竞争失败的请求跳过
        let due = self.queue.due_requests(now).await?;
        let mut claimed = Vec::new();
        for request in due.into_iter().take(self.config.max_concurrent_processing) {
            if let Some(owned) = self.queue.claim(&request.id, now).await? {
                claimed.push(owned);
            }
        }

        let outcomes: Vec<Outcome> = stream::iter(claimed)
            .map(|request| self.process(request))
            .buffer_unordered(self.config.max_concurrent_processing)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Approved => summary.approved += 1,
                Outcome::Rejected => summary.rejected += 1,
                Outcome::Retried => summary.retried += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Errored => {}
            }
        }
        Ok(summary)
    }

    /// 处理单个已认领的请求
    async fn process(&self, request: AssignmentRequest) -> Outcome {
        let now = self.clock.now();
        // 基于最新状态重新校验（请求只是弱引用，入队后世界可能已变化）
        match self.revalidate(&request).await {
            Ok(Some((item, operator, history))) => {
                let requirements = WorkRequirements::from_work_item(&item);
                let recommendation = self.scoring.evaluate(&requirements, &operator, &history, now);
                if f64::from(recommendation.confidence) < self.config.min_confidence {
                    // 置信度不足是暂时性的（负载、状态随时间变化），退避重试
                    let reason = format!(
                        "置信度 {} 低于最低要求 {}",
                        recommendation.confidence, self.config.min_confidence
                    );
                    return self.retry_or_fail(&request, &reason).await;
                }

                match self
                    .assignments
                    .assign(&request.work_item_id, &request.operator_id, WORKER_ACTOR)
                    .await
                {
                    Ok(assignment) => {
                        match self
                            .queue
                            .resolve_approved(&request.id, &assignment.id, self.clock.now())
                            .await
                        {
                            Ok(()) => {
                                info!(
                                    request_id = %request.id,
                                    assignment_id = %assignment.id,
                                    confidence = recommendation.confidence,
                                    "自助指派请求批准"
                                );
                                Outcome::Approved
                            }
                            Err(e) => {
                                // 指派已提交，仅请求状态落后；下一轮回收修正
                                error!(request_id = %request.id, "请求状态更新失败: {e}");
                                Outcome::Errored
                            }
                        }
                    }
                    Err(e) if e.is_retryable() => self.retry_or_fail(&request, &e.to_string()).await,
                    Err(e) => self.reject(&request, &e.to_string()).await,
                }
            }
            Ok(None) => Outcome::Rejected,
            Err(e) if e.is_retryable() => self.retry_or_fail(&request, &e.to_string()).await,
            Err(e) => self.reject(&request, &e.to_string()).await,
        }
    }

    /// 重新拉取工单与操作员并校验资格
    ///
    /// 返回 `Ok(None)` 表示请求已被就地拒绝（终态原因）。
    async fn revalidate(
        &self,
        request: &AssignmentRequest,
    ) -> SchedulingResult<Option<(WorkItem, Operator, PerformanceHistory)>> {
        let item = match self.load::<WorkItem>(DocKey::work_item(&request.work_item_id)).await? {
            Some(item) => item,
            None => {
                self.queue
                    .resolve_rejected(&request.id, "工单不存在", self.clock.now())
                    .await?;
                return Ok(None);
            }
        };
        let operator = match self
            .load::<Operator>(DocKey::operator(&request.operator_id))
            .await?
        {
            Some(op) => op,
            None => {
                self.queue
                    .resolve_rejected(&request.id, "操作员不存在", self.clock.now())
                    .await?;
                return Ok(None);
            }
        };

        if let Err(e) = check_item_assignable(&item).and_then(|_| {
            check_operator_eligibility(&item, &operator)
        }) {
            self.queue
                .resolve_rejected(&request.id, &e.to_string(), self.clock.now())
                .await?;
            return Ok(None);
        }

        let history = self
            .load::<PerformanceHistory>(DocKey::history(&request.operator_id))
            .await?
            .unwrap_or_else(|| PerformanceHistory::new(&request.operator_id));
        Ok(Some((item, operator, history)))
    }

    async fn load<T: serde::de::DeserializeOwned>(
        &self,
        key: DocKey,
    ) -> SchedulingResult<Option<T>> {
        match self.store.get(&key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn retry_or_fail(&self, request: &AssignmentRequest, reason: &str) -> Outcome {
        match self
            .queue
            .record_failure(&request.id, reason, self.clock.now())
            .await
        {
            Ok(RequestStatus::Pending) => {
                debug!(request_id = %request.id, "请求退避后重试: {reason}");
                Outcome::Retried
            }
            Ok(_) => Outcome::Failed,
            Err(e) => {
                error!(request_id = %request.id, "记录请求失败时出错: {e}");
                Outcome::Errored
            }
        }
    }

    async fn reject(&self, request: &AssignmentRequest, reason: &str) -> Outcome {
        match self
            .queue
            .resolve_rejected(&request.id, reason, self.clock.now())
            .await
        {
            Ok(()) => {
                warn!(request_id = %request.id, "请求被拒绝: {reason}");
                Outcome::Rejected
            }
            Err(e) => {
                error!(request_id = %request.id, "拒绝请求时出错: {e}");
                Outcome::Errored
            }
        }
    }
}
