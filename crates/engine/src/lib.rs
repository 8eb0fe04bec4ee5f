//! 指派引擎
//!
//! 车间工单指派的核心逻辑：分布式锁、指派事务、请求队列、
//! 评分引擎与业务规则巡检。只依赖 shopfloor-core 的端口抽象，
//! 不绑定具体存储。

pub mod assignment_service;
pub mod eligibility;
pub mod lock_manager;
pub mod queue;
pub mod queue_worker;
pub mod rules;
pub mod scoring;

pub use assignment_service::AssignmentService;
pub use lock_manager::LockManager;
pub use queue::RequestQueue;
pub use queue_worker::{QueueWorker, TickSummary};
pub use rules::{Alert, AlertSeverity, Rule, RuleEvaluator, RuleKind, SessionSnapshot};
pub use scoring::ScoringEngine;
