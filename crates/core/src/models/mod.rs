pub mod assignment;
pub mod audit;
pub mod lock;
pub mod operator;
pub mod recommendation;
pub mod request;
pub mod work_item;

pub use assignment::{Assignment, AssignmentStatus};
pub use audit::{AuditAction, AuditRecord};
pub use lock::{DistributedLock, LockGrant};
pub use operator::{
    CompletionRecord, Operator, OperatorStatus, PerformanceHistory, PERFORMANCE_WINDOW,
};
pub use recommendation::{Recommendation, WorkRequirements};
pub use request::{
    AssignmentRequest, EnqueueReceipt, QueueStats, RequestStatus, RequestStatusView,
};
pub use work_item::{MachineFamily, SkillTier, Urgency, WorkItem, WorkItemStatus};
