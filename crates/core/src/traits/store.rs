//! 事务性文档存储抽象接口
//!
//! 指派引擎只依赖此端口，不绑定具体持久化技术：任何提供可串行化
//! 隔离或 compare-and-swap 的存储都可以作为后端（内存、SQLite 等）。
//! 事务内对多个文档的读改写要么全部生效，要么全部回滚。

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::SchedulingResult;

/// 文档键，带类型前缀的逻辑标识
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocKey(String);

impl DocKey {
    pub const WORK_ITEM_PREFIX: &'static str = "work_item:";
    pub const OPERATOR_PREFIX: &'static str = "operator:";
    pub const ASSIGNMENT_PREFIX: &'static str = "assignment:";
    pub const REQUEST_PREFIX: &'static str = "request:";
    pub const LOCK_PREFIX: &'static str = "lock:";
    pub const HISTORY_PREFIX: &'static str = "history:";
    pub const AUDIT_PREFIX: &'static str = "audit:";

    pub fn work_item(id: &str) -> Self {
        Self(format!("{}{id}", Self::WORK_ITEM_PREFIX))
    }

    pub fn operator(id: &str) -> Self {
        Self(format!("{}{id}", Self::OPERATOR_PREFIX))
    }

    pub fn assignment(id: &str) -> Self {
        Self(format!("{}{id}", Self::ASSIGNMENT_PREFIX))
    }

    pub fn request(id: &str) -> Self {
        Self(format!("{}{id}", Self::REQUEST_PREFIX))
    }

    pub fn lock(resource_id: &str) -> Self {
        Self(format!("{}{resource_id}", Self::LOCK_PREFIX))
    }

    pub fn history(operator_id: &str) -> Self {
        Self(format!("{}{operator_id}", Self::HISTORY_PREFIX))
    }

    pub fn audit(id: &str) -> Self {
        Self(format!("{}{id}", Self::AUDIT_PREFIX))
    }

    /// 队列入队序号计数器
    pub fn queue_meta() -> Self {
        Self("queue:meta".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 事务内的文档操作句柄
#[async_trait]
pub trait DocumentTxn: Send {
    /// 读取文档，读到的是事务内的最新视图（含本事务未提交的写入）
    async fn get(&mut self, key: &DocKey) -> SchedulingResult<Option<Value>>;

    /// 写入文档，提交前对事务外不可见
    async fn set(&mut self, key: &DocKey, value: Value) -> SchedulingResult<()>;

    /// 删除文档，删除不存在的文档不报错
    async fn delete(&mut self, key: &DocKey) -> SchedulingResult<()>;
}

/// 事务闭包类型
///
/// 闭包持有自己的数据（'static），通过返回值向外传递结果文档；
/// 返回 Err 时整个事务回滚。
pub type TxnFunc = Box<
    dyn for<'t> FnOnce(&'t mut dyn DocumentTxn) -> BoxFuture<'t, SchedulingResult<Value>>
        + Send,
>;

/// 事务性文档存储端口
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 读取单个文档
    async fn get(&self, key: &DocKey) -> SchedulingResult<Option<Value>>;

    /// 写入单个文档（独立的单文档事务）
    async fn set(&self, key: &DocKey, value: Value) -> SchedulingResult<()>;

    /// 按键前缀列出文档，返回 (键, 文档)
    async fn list_prefix(&self, prefix: &str) -> SchedulingResult<Vec<(String, Value)>>;

    /// 原子地执行一次多文档读改写事务
    async fn transaction(&self, func: TxnFunc) -> SchedulingResult<Value>;
}

/// 事务内读取并反序列化文档
pub async fn read_doc<T: DeserializeOwned>(
    txn: &mut dyn DocumentTxn,
    key: &DocKey,
) -> SchedulingResult<Option<T>> {
    match txn.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// 事务内序列化并写入文档
pub async fn write_doc<T: Serialize>(
    txn: &mut dyn DocumentTxn,
    key: &DocKey,
    doc: &T,
) -> SchedulingResult<()> {
    txn.set(key, serde_json::to_value(doc)?).await
}

/// 执行事务并把结果文档反序列化为目标类型
///
/// 事务闭包以 `Ok(serde_json::Value)` 返回结果；无结果时返回
/// `Value::Null`，对应 `T = ()`。
pub async fn transact<T, F>(store: &dyn DocumentStore, func: F) -> SchedulingResult<T>
where
    T: DeserializeOwned,
    F: for<'t> FnOnce(&'t mut dyn DocumentTxn) -> BoxFuture<'t, SchedulingResult<Value>>
        + Send
        + 'static,
{
    let value = store.transaction(Box::new(func)).await?;
    Ok(serde_json::from_value(value)?)
}
