pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::{
    AppConfig, DatabaseConfig, LockConfig, ObservabilityConfig, QueueConfig, ScoringConfig,
    ScoringWeights,
};
pub use errors::{EligibilityReason, SchedulingError, SchedulingResult};
pub use logging::init_logging;
pub use models::{
    Assignment, AssignmentRequest, AssignmentStatus, AuditAction, AuditRecord, CompletionRecord,
    DistributedLock, EnqueueReceipt, LockGrant, MachineFamily, Operator, OperatorStatus,
    PerformanceHistory, QueueStats, Recommendation, RequestStatus, RequestStatusView, SkillTier,
    Urgency, WorkItem, WorkItemStatus, WorkRequirements,
};
pub use traits::{
    read_doc, transact, write_doc, Clock, DocKey, DocumentStore, DocumentTxn, FixedClock,
    Notification, NotificationDispatcher, NotificationKind, SystemClock, TxnFunc,
};
