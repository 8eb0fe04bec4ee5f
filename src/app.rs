//! 应用装配与对外门面
//!
//! 按配置装配存储、锁管理器、指派服务、请求队列、评分引擎与队列
//! 工作者，并把系统的全部操作收敛为一组方法。上层集成（API、站内
//! 工具、测试）只与本门面交互。

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use shopfloor_core::config::AppConfig;
use shopfloor_core::errors::{SchedulingError, SchedulingResult};
use shopfloor_core::models::{
    Assignment, EnqueueReceipt, Operator, PerformanceHistory, QueueStats, Recommendation,
    RequestStatusView, WorkItem, WorkRequirements,
};
use shopfloor_core::traits::{
    Clock, DocKey, DocumentStore, NotificationDispatcher, SystemClock,
};
use shopfloor_engine::{
    Alert, AssignmentService, LockManager, QueueWorker, RequestQueue, RuleEvaluator,
    ScoringEngine, SessionSnapshot,
};
use shopfloor_infrastructure::{LogNotifier, MemoryStore, SqliteStore};

pub struct Application {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    assignments: Arc<AssignmentService>,
    queue: Arc<RequestQueue>,
    scoring: Arc<ScoringEngine>,
    rules: RuleEvaluator,
    worker: QueueWorker,
}

impl Application {
    /// 按配置装配应用，存储后端由 database.url 决定
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store: Arc<dyn DocumentStore> = if config.database.url == "memory" {
            info!("使用内存文档存储");
            Arc::new(MemoryStore::new())
        } else {
            info!("使用SQLite文档存储: {}", config.database.url);
            Arc::new(
                SqliteStore::connect(&config.database.url, config.database.max_connections)
                    .await
                    .context("连接文档存储失败")?,
            )
        };
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let notifier: Arc<dyn NotificationDispatcher> = Arc::new(LogNotifier::new());
        Ok(Self::assemble(config, store, clock, notifier))
    }

    /// 用外部提供的端口实现装配，测试与嵌入式部署使用
    pub fn assemble(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let locks = Arc::new(LockManager::new(
            store.clone(),
            clock.clone(),
            config.lock.clone(),
        ));
        let assignments = Arc::new(AssignmentService::new(
            store.clone(),
            locks,
            notifier,
            clock.clone(),
        ));
        let queue = Arc::new(RequestQueue::new(
            store.clone(),
            clock.clone(),
            config.queue.clone(),
        ));
        let scoring = Arc::new(ScoringEngine::new(config.scoring.clone()));
        let worker = QueueWorker::new(
            queue.clone(),
            assignments.clone(),
            scoring.clone(),
            store.clone(),
            clock.clone(),
            config.queue.clone(),
        );
        Self {
            store,
            clock,
            assignments,
            queue,
            scoring,
            rules: RuleEvaluator::with_defaults(),
            worker,
        }
    }

    /// 运行后台队列工作者直到关闭标志翻转
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.worker.run(shutdown).await;
        Ok(())
    }

    // ---- 工单与操作员维护 ----

    /// 写入或整体覆盖工单，仅用于初始化与主数据同步
    ///
    /// 直接覆盖文档，不走资源锁；运行期由引擎管理的字段
    /// （状态、操作员绑定）不要经此修改，用指派操作。
    pub async fn upsert_work_item(&self, item: WorkItem) -> SchedulingResult<()> {
        if !(1..=10).contains(&item.complexity) {
            return Err(SchedulingError::Validation(format!(
                "工艺复杂度必须在1-10之间: {}",
                item.complexity
            )));
        }
        if !(0.0..=100.0).contains(&item.min_quality_pct) {
            return Err(SchedulingError::Validation(format!(
                "最低质量要求必须在0-100之间: {}",
                item.min_quality_pct
            )));
        }
        self.store
            .set(&DocKey::work_item(&item.id), serde_json::to_value(&item)?)
            .await
    }

    pub async fn get_work_item(&self, id: &str) -> SchedulingResult<WorkItem> {
        let value = self
            .store
            .get(&DocKey::work_item(id))
            .await?
            .ok_or_else(|| SchedulingError::NotFound {
                kind: "工单",
                id: id.to_string(),
            })?;
        Ok(serde_json::from_value(value)?)
    }

    /// 写入或整体覆盖操作员，仅用于初始化与主数据同步
    ///
    /// 同 [`Self::upsert_work_item`]：不走资源锁，运行期的
    /// 负载计数由指派事务维护。
    pub async fn upsert_operator(&self, operator: Operator) -> SchedulingResult<()> {
        if operator.current_assignments > operator.capacity {
            return Err(SchedulingError::Validation(format!(
                "当前指派数 {} 超过容量 {}",
                operator.current_assignments, operator.capacity
            )));
        }
        self.store
            .set(
                &DocKey::operator(&operator.id),
                serde_json::to_value(&operator)?,
            )
            .await
    }

    pub async fn get_operator(&self, id: &str) -> SchedulingResult<Operator> {
        let value = self
            .store
            .get(&DocKey::operator(id))
            .await?
            .ok_or_else(|| SchedulingError::NotFound {
                kind: "操作员",
                id: id.to_string(),
            })?;
        Ok(serde_json::from_value(value)?)
    }

    // ---- 指派操作 ----

    pub async fn assign_work(
        &self,
        work_item_id: &str,
        operator_id: &str,
        supervisor_id: &str,
    ) -> SchedulingResult<Assignment> {
        self.assignments
            .assign(work_item_id, operator_id, supervisor_id)
            .await
    }

    pub async fn complete_assignment(
        &self,
        assignment_id: &str,
        operator_id: &str,
        completed_quantity: u32,
        rejected_quantity: u32,
        quality_score: f64,
    ) -> SchedulingResult<Assignment> {
        self.assignments
            .complete(
                assignment_id,
                operator_id,
                completed_quantity,
                rejected_quantity,
                quality_score,
            )
            .await
    }

    pub async fn reassign_work(
        &self,
        assignment_id: &str,
        new_operator_id: &str,
        supervisor_id: &str,
        reason: &str,
    ) -> SchedulingResult<Assignment> {
        self.assignments
            .reassign(assignment_id, new_operator_id, supervisor_id, reason)
            .await
    }

    // ---- 请求队列 ----

    pub async fn enqueue_assignment_request(
        &self,
        work_item_id: &str,
        operator_id: &str,
        reason: Option<String>,
    ) -> SchedulingResult<EnqueueReceipt> {
        self.queue.enqueue(work_item_id, operator_id, reason).await
    }

    pub async fn cancel_assignment_request(
        &self,
        request_id: &str,
        reason: &str,
    ) -> SchedulingResult<()> {
        self.queue.dequeue(request_id, reason).await.map(|_| ())
    }

    pub async fn get_request_status(
        &self,
        request_id: &str,
    ) -> SchedulingResult<RequestStatusView> {
        self.queue.status(request_id).await
    }

    pub async fn get_queue_stats(&self) -> SchedulingResult<QueueStats> {
        self.queue.stats().await
    }

    // ---- 推荐 ----

    /// 对候选操作员评分并按置信度降序返回
    ///
    /// 缺失的候选跳过并记录告警，不让单个脏引用拖垮整个推荐。
    pub async fn get_recommendations(
        &self,
        work_item_id: &str,
        candidate_ids: &[String],
        max_results: usize,
    ) -> SchedulingResult<Vec<Recommendation>> {
        let item = self.get_work_item(work_item_id).await?;
        let requirements = WorkRequirements::from_work_item(&item);

        let mut candidates = Vec::with_capacity(candidate_ids.len());
        for operator_id in candidate_ids {
            let operator = match self.store.get(&DocKey::operator(operator_id)).await? {
                Some(value) => serde_json::from_value::<Operator>(value)?,
                None => {
                    warn!(operator_id = %operator_id, "候选操作员不存在，跳过");
                    continue;
                }
            };
            let history = match self.store.get(&DocKey::history(operator_id)).await? {
                Some(value) => serde_json::from_value(value)?,
                None => PerformanceHistory::new(operator_id),
            };
            candidates.push((operator, history));
        }

        Ok(self
            .scoring
            .rank(&requirements, &candidates, max_results, self.clock.now()))
    }

    /// 手动触发一轮队列处理，运维与测试入口
    pub async fn process_queue_once(&self) -> SchedulingResult<shopfloor_engine::TickSummary> {
        self.worker.tick().await
    }

    // ---- 规则巡检 ----

    /// 对一次进行中的生产会话做规则巡检，返回触发的告警
    pub fn evaluate_session(&self, snapshot: &SessionSnapshot) -> Vec<Alert> {
        self.rules.evaluate(snapshot)
    }
}
