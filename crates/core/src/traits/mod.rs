//! 核心端口定义
//!
//! 指派引擎通过这些接口与外部协作者解耦：
//! - `DocumentStore` / `DocumentTxn` - 事务性文档存储
//! - `NotificationDispatcher` - 指派成功后的通知分发
//! - `Clock` - 显式注入的时间源

pub mod clock;
pub mod notifier;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use notifier::{Notification, NotificationDispatcher, NotificationKind};
pub use store::{read_doc, transact, write_doc, DocKey, DocumentStore, DocumentTxn, TxnFunc};
