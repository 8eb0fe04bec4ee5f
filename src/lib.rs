//! 车间工单指派与调度系统
//!
//! 核心是指派并发与调度引擎：分布式锁管理器、原子的
//! assign/complete/reassign 事务、带重试退避的优先级请求队列，
//! 以及用于推荐与自动批准的确定性操作员评分算法。

pub mod app;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
