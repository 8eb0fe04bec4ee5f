//! 请求队列与队列工作者集成测试：内存存储 + 固定时钟

use std::sync::Arc;

use chrono::{Duration, Utc};

use shopfloor_core::config::{LockConfig, QueueConfig, ScoringConfig};
use shopfloor_core::errors::SchedulingError;
use shopfloor_core::models::{
    AssignmentRequest, MachineFamily, Operator, OperatorStatus, RequestStatus, SkillTier,
    Urgency, WorkItem, WorkItemStatus,
};
use shopfloor_core::traits::{Clock, DocKey, DocumentStore, FixedClock, NotificationDispatcher};
use shopfloor_engine::{AssignmentService, LockManager, QueueWorker, RequestQueue, ScoringEngine};
use shopfloor_infrastructure::{MemoryStore, RecordingNotifier};

fn queue_config() -> QueueConfig {
    QueueConfig {
        tick_seconds: 10,
        max_concurrent_processing: 5,
        max_retry_attempts: 3,
        base_retry_interval_seconds: 60,
        backoff_multiplier: 2.0,
        jitter_factor: 0.0,
        min_confidence: 50.0,
        request_ttl_hours: 24,
        stale_claim_timeout_seconds: 300,
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<FixedClock>,
    queue: Arc<RequestQueue>,
    worker: QueueWorker,
}

fn harness(config: QueueConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let locks = Arc::new(LockManager::new(
        store.clone() as Arc<dyn DocumentStore>,
        clock.clone() as Arc<dyn Clock>,
        LockConfig { ttl_ms: 30_000 },
    ));
    let service = Arc::new(AssignmentService::new(
        store.clone() as Arc<dyn DocumentStore>,
        locks,
        Arc::new(RecordingNotifier::new()) as Arc<dyn NotificationDispatcher>,
        clock.clone() as Arc<dyn Clock>,
    ));
    let queue = Arc::new(RequestQueue::new(
        store.clone() as Arc<dyn DocumentStore>,
        clock.clone() as Arc<dyn Clock>,
        config.clone(),
    ));
    let scoring = Arc::new(ScoringEngine::new(ScoringConfig {
        weights: Default::default(),
        auto_approve_threshold: 85.0,
    }));
    let worker = QueueWorker::new(
        queue.clone(),
        service,
        scoring,
        store.clone() as Arc<dyn DocumentStore>,
        clock.clone() as Arc<dyn Clock>,
        config,
    );
    Harness {
        store,
        clock,
        queue,
        worker,
    }
}

impl Harness {
    async fn seed_item(&self, item: &WorkItem) {
        self.store
            .set(
                &DocKey::work_item(&item.id),
                serde_json::to_value(item).expect("序列化工单失败"),
            )
            .await
            .expect("写入工单失败");
    }

    async fn seed_operator(&self, operator: &Operator) {
        self.store
            .set(
                &DocKey::operator(&operator.id),
                serde_json::to_value(operator).expect("序列化操作员失败"),
            )
            .await
            .expect("写入操作员失败");
    }

    async fn load_request(&self, id: &str) -> AssignmentRequest {
        let value = self
            .store
            .get(&DocKey::request(id))
            .await
            .expect("读取请求失败")
            .expect("请求缺失");
        serde_json::from_value(value).expect("反序列化请求失败")
    }

    async fn load_item(&self, id: &str) -> WorkItem {
        let value = self
            .store
            .get(&DocKey::work_item(id))
            .await
            .expect("读取工单失败")
            .expect("工单缺失");
        serde_json::from_value(value).expect("反序列化工单失败")
    }
}

fn item_with_urgency(id: &str, urgency: Urgency) -> WorkItem {
    let mut item = WorkItem::new(
        id,
        MachineFamily::Overlock,
        "overlock_seam",
        SkillTier::Intermediate,
        100,
        Utc::now(),
    );
    item.urgency = urgency;
    item
}

fn capable_operator(id: &str) -> Operator {
    let mut op = Operator::new(id, "队列测试操作员", MachineFamily::Overlock, 3, Utc::now());
    op.skills
        .insert("overlock_seam".to_string(), SkillTier::Advanced);
    op.efficiency_ratio = 1.1;
    op.quality_pct = 96.0;
    op
}

#[tokio::test]
async fn test_eligible_request_is_approved_via_assign_path() {
    let h = harness(queue_config());
    h.seed_item(&item_with_urgency("wi-1", Urgency::Medium)).await;
    h.seed_operator(&capable_operator("op-1")).await;

    let receipt = h
        .queue
        .enqueue("wi-1", "op-1", Some("想接这单".to_string()))
        .await
        .expect("入队失败");
    assert_eq!(receipt.queue_position, 1);

    let summary = h.worker.tick().await.expect("处理轮次失败");
    assert_eq!(summary.approved, 1);

    let request = h.load_request(&receipt.request_id).await;
    assert_eq!(request.status, RequestStatus::Approved);
    let assignment_id = request.assignment_id.expect("批准请求应关联指派");

    // 走的是与人工指派相同的事务路径
    let item = h.load_item("wi-1").await;
    assert_eq!(item.status, WorkItemStatus::Assigned);
    assert_eq!(item.assigned_operator_id.as_deref(), Some("op-1"));
    assert!(h
        .store
        .get(&DocKey::assignment(&assignment_id))
        .await
        .expect("读取指派失败")
        .is_some());
}

#[tokio::test]
async fn test_ineligible_request_is_rejected_terminally() {
    let h = harness(queue_config());
    h.seed_item(&item_with_urgency("wi-1", Urgency::Medium)).await;
    let mut offline = capable_operator("op-1");
    offline.status = OperatorStatus::Offline;
    h.seed_operator(&offline).await;

    let receipt = h
        .queue
        .enqueue("wi-1", "op-1", None)
        .await
        .expect("入队失败");
    let summary = h.worker.tick().await.expect("处理轮次失败");
    assert_eq!(summary.rejected, 1);

    let request = h.load_request(&receipt.request_id).await;
    assert_eq!(request.status, RequestStatus::Rejected);
    assert!(request.last_failure.expect("应记录失败原因").contains("离线"));

    // 终态拒绝不会重试
    h.clock.advance(Duration::hours(1));
    let summary = h.worker.tick().await.expect("处理轮次失败");
    assert_eq!(summary.processed(), 0);
}

#[tokio::test]
async fn test_low_confidence_retries_with_exponential_backoff() {
    let mut config = queue_config();
    config.min_confidence = 99.5;
    let h = harness(config);
    h.seed_item(&item_with_urgency("wi-1", Urgency::Medium)).await;
    // 合格但评分平平的操作员
    let mut mediocre = capable_operator("op-1");
    mediocre.efficiency_ratio = 0.7;
    mediocre.quality_pct = 91.0;
    h.seed_operator(&mediocre).await;

    let receipt = h
        .queue
        .enqueue("wi-1", "op-1", None)
        .await
        .expect("入队失败");

    // 第一次失败：attempts=1，退避 60*2^1=120s
    let summary = h.worker.tick().await.expect("处理轮次失败");
    assert_eq!(summary.retried, 1);
    let request = h.load_request(&receipt.request_id).await;
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.attempts, 1);
    let first_backoff = request.next_attempt_at.expect("应设置下次处理时间");
    assert!(first_backoff >= h.clock.now() + Duration::seconds(120));

    // 退避期内不被选中
    h.clock.advance(Duration::seconds(60));
    let summary = h.worker.tick().await.expect("处理轮次失败");
    assert_eq!(summary.processed(), 0);

    // 第二次失败：attempts=2，第三次重试不早于 base*mult^2 = 240s
    h.clock.advance(Duration::seconds(61));
    let summary = h.worker.tick().await.expect("处理轮次失败");
    assert_eq!(summary.retried, 1);
    let request = h.load_request(&receipt.request_id).await;
    assert_eq!(request.attempts, 2);
    let second_backoff = request.next_attempt_at.expect("应设置下次处理时间");
    assert!(second_backoff >= h.clock.now() + Duration::seconds(240));

    // 第三次失败耗尽重试次数，置为 failed，永不再试
    h.clock.advance(Duration::seconds(241));
    let summary = h.worker.tick().await.expect("处理轮次失败");
    assert_eq!(summary.failed, 1);
    let request = h.load_request(&receipt.request_id).await;
    assert_eq!(request.status, RequestStatus::Failed);
    assert_eq!(request.attempts, 3);

    h.clock.advance(Duration::hours(1));
    let summary = h.worker.tick().await.expect("处理轮次失败");
    assert_eq!(summary.processed(), 0);
}

#[tokio::test]
async fn test_requests_expire_past_ttl_regardless_of_attempts() {
    let h = harness(queue_config());
    h.seed_item(&item_with_urgency("wi-1", Urgency::Medium)).await;
    h.seed_operator(&capable_operator("op-1")).await;

    // 先占住工单，让请求始终无法批准
    let blocker = capable_operator("op-2");
    h.seed_operator(&blocker).await;
    let receipt = h
        .queue
        .enqueue("wi-1", "op-1", None)
        .await
        .expect("入队失败");
    // 入队后工单被他人直接指派
    let mut item = h.load_item("wi-1").await;
    item.status = WorkItemStatus::Assigned;
    item.assigned_operator_id = Some("op-2".to_string());
    h.seed_item(&item).await;

    h.clock.advance(Duration::hours(25));
    let summary = h.worker.tick().await.expect("处理轮次失败");
    assert_eq!(summary.expired, 1);
    let request = h.load_request(&receipt.request_id).await;
    assert_eq!(request.status, RequestStatus::Expired);
}

#[tokio::test]
async fn test_stale_processing_claim_is_recovered_and_reprocessed() {
    let h = harness(queue_config());
    h.seed_item(&item_with_urgency("wi-1", Urgency::Medium)).await;
    h.seed_operator(&capable_operator("op-1")).await;

    let receipt = h
        .queue
        .enqueue("wi-1", "op-1", None)
        .await
        .expect("入队失败");
    // 模拟另一个工作者认领后崩溃
    let claimed = h
        .queue
        .claim(&receipt.request_id, h.clock.now())
        .await
        .expect("认领失败");
    assert!(claimed.is_some());

    // 未超时前不回收
    h.clock.advance(Duration::seconds(200));
    let summary = h.worker.tick().await.expect("处理轮次失败");
    assert_eq!(summary.recovered, 0);

    h.clock.advance(Duration::seconds(101));
    let summary = h.worker.tick().await.expect("处理轮次失败");
    assert_eq!(summary.recovered, 1);
    // 回收后同一轮即被重新处理并批准
    assert_eq!(summary.approved, 1);
    let request = h.load_request(&receipt.request_id).await;
    assert_eq!(request.status, RequestStatus::Approved);
}

#[tokio::test]
async fn test_claimed_request_is_not_expired_mid_flight() {
    let h = harness(queue_config());
    h.seed_item(&item_with_urgency("wi-1", Urgency::Medium)).await;
    h.seed_operator(&capable_operator("op-1")).await;

    let receipt = h
        .queue
        .enqueue("wi-1", "op-1", None)
        .await
        .expect("入队失败");
    let claimed = h
        .queue
        .claim(&receipt.request_id, h.clock.now())
        .await
        .expect("认领失败");
    assert!(claimed.is_some());

    // 认领后的尝试不受 TTL 影响，必须跑到类型化结果
    h.clock.advance(Duration::hours(25));
    let expired = h
        .queue
        .expire_overdue(h.clock.now())
        .await
        .expect("过期扫描失败");
    assert_eq!(expired, 0);
    let request = h.load_request(&receipt.request_id).await;
    assert_eq!(request.status, RequestStatus::Processing);

    // 失联回收把它放回待处理，之后才轮到过期
    let recovered = h
        .queue
        .recover_stale_claims(h.clock.now())
        .await
        .expect("回收失败");
    assert_eq!(recovered, 1);
    let expired = h
        .queue
        .expire_overdue(h.clock.now())
        .await
        .expect("过期扫描失败");
    assert_eq!(expired, 1);
    let request = h.load_request(&receipt.request_id).await;
    assert_eq!(request.status, RequestStatus::Expired);
}

#[tokio::test]
async fn test_resolvers_only_settle_claimed_requests() {
    let h = harness(queue_config());
    h.seed_item(&item_with_urgency("wi-1", Urgency::Medium)).await;
    h.seed_operator(&capable_operator("op-1")).await;

    let receipt = h
        .queue
        .enqueue("wi-1", "op-1", None)
        .await
        .expect("入队失败");

    // 未认领的请求不能落定结果
    assert!(matches!(
        h.queue
            .resolve_approved(&receipt.request_id, "as-1", h.clock.now())
            .await,
        Err(SchedulingError::Validation(_))
    ));
    assert!(matches!(
        h.queue
            .resolve_rejected(&receipt.request_id, "测试", h.clock.now())
            .await,
        Err(SchedulingError::Validation(_))
    ));
    assert!(matches!(
        h.queue
            .record_failure(&receipt.request_id, "测试", h.clock.now())
            .await,
        Err(SchedulingError::Validation(_))
    ));
    let request = h.load_request(&receipt.request_id).await;
    assert_eq!(request.status, RequestStatus::Pending);
    assert_eq!(request.attempts, 0);
}

#[tokio::test]
async fn test_stale_low_priority_request_outranks_fresh_medium() {
    let mut config = queue_config();
    config.max_concurrent_processing = 1;
    config.request_ttl_hours = 100;
    let h = harness(config);
    h.seed_item(&item_with_urgency("wi-low", Urgency::Low)).await;
    h.seed_item(&item_with_urgency("wi-med", Urgency::Medium)).await;
    h.seed_operator(&capable_operator("op-1")).await;
    h.seed_operator(&capable_operator("op-2")).await;

    let low = h
        .queue
        .enqueue("wi-low", "op-1", None)
        .await
        .expect("入队失败");
    // 低优先级请求等待 26 小时后，实时优先级反超新入队的中优先级
    h.clock.advance(Duration::hours(26));
    let medium = h
        .queue
        .enqueue("wi-med", "op-2", None)
        .await
        .expect("入队失败");

    let summary = h.worker.tick().await.expect("处理轮次失败");
    assert_eq!(summary.approved, 1);
    assert_eq!(
        h.load_request(&low.request_id).await.status,
        RequestStatus::Approved
    );
    assert_eq!(
        h.load_request(&medium.request_id).await.status,
        RequestStatus::Pending
    );
}

#[tokio::test]
async fn test_dequeue_resolves_pending_request_out_of_band() {
    let h = harness(queue_config());
    h.seed_item(&item_with_urgency("wi-1", Urgency::Medium)).await;
    h.seed_operator(&capable_operator("op-1")).await;

    let receipt = h
        .queue
        .enqueue("wi-1", "op-1", None)
        .await
        .expect("入队失败");
    let request = h
        .queue
        .dequeue(&receipt.request_id, "操作员改变主意")
        .await
        .expect("撤销失败");
    assert_eq!(request.status, RequestStatus::Rejected);

    // 终态请求不能再次撤销
    let err = h
        .queue
        .dequeue(&receipt.request_id, "重复撤销")
        .await
        .expect_err("终态请求应拒绝撤销");
    assert!(matches!(err, SchedulingError::Validation(_)));

    // 撤销后的请求不会被处理
    let summary = h.worker.tick().await.expect("处理轮次失败");
    assert_eq!(summary.processed(), 0);
}

#[tokio::test]
async fn test_status_reports_live_queue_position() {
    let mut config = queue_config();
    config.max_concurrent_processing = 1;
    let h = harness(config);
    h.seed_item(&item_with_urgency("wi-1", Urgency::Urgent)).await;
    h.seed_item(&item_with_urgency("wi-2", Urgency::Low)).await;
    h.seed_operator(&capable_operator("op-1")).await;
    h.seed_operator(&capable_operator("op-2")).await;

    let urgent = h
        .queue
        .enqueue("wi-1", "op-1", None)
        .await
        .expect("入队失败");
    let low = h
        .queue
        .enqueue("wi-2", "op-2", None)
        .await
        .expect("入队失败");

    let view = h.queue.status(&urgent.request_id).await.expect("查询失败");
    assert_eq!(view.position, Some(1));
    assert_eq!(view.status, RequestStatus::Pending);
    let view = h.queue.status(&low.request_id).await.expect("查询失败");
    assert_eq!(view.position, Some(2));

    h.worker.tick().await.expect("处理轮次失败");
    // 紧急请求已批准，低优先级请求升至队首
    let view = h.queue.status(&urgent.request_id).await.expect("查询失败");
    assert_eq!(view.position, None);
    assert_eq!(view.status, RequestStatus::Approved);
    let view = h.queue.status(&low.request_id).await.expect("查询失败");
    assert_eq!(view.position, Some(1));
}

#[tokio::test]
async fn test_stats_aggregate_queue_outcomes() {
    let h = harness(queue_config());
    h.seed_item(&item_with_urgency("wi-1", Urgency::Medium)).await;
    h.seed_item(&item_with_urgency("wi-2", Urgency::Medium)).await;
    h.seed_operator(&capable_operator("op-1")).await;
    let mut offline = capable_operator("op-2");
    offline.status = OperatorStatus::Offline;
    h.seed_operator(&offline).await;

    h.queue.enqueue("wi-1", "op-1", None).await.expect("入队失败");
    h.queue.enqueue("wi-2", "op-2", None).await.expect("入队失败");
    h.worker.tick().await.expect("处理轮次失败");

    let stats = h.queue.stats().await.expect("统计失败");
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.success_rate_pct, 50.0);
}

#[tokio::test]
async fn test_enqueue_validates_references() {
    let h = harness(queue_config());
    let err = h
        .queue
        .enqueue("wi-404", "op-1", None)
        .await
        .expect_err("缺失工单应报未找到");
    assert!(matches!(err, SchedulingError::NotFound { kind: "工单", .. }));

    h.seed_item(&item_with_urgency("wi-1", Urgency::Medium)).await;
    let err = h
        .queue
        .enqueue("wi-1", "op-404", None)
        .await
        .expect_err("缺失操作员应报未找到");
    assert!(matches!(err, SchedulingError::NotFound { kind: "操作员", .. }));
}
