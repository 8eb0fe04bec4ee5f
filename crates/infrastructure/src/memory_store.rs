use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use shopfloor_core::errors::SchedulingResult;
use shopfloor_core::traits::{DocKey, DocumentStore, DocumentTxn, TxnFunc};

/// 内存文档存储
///
/// 事务持互斥锁执行，天然满足可串行化隔离；写入先暂存，
/// 闭包成功返回后一次性提交，出错则整体丢弃。
/// 用于测试与单进程内嵌部署。
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 事务视图：读穿透到基础映射，写暂存本地
struct MemoryTxn<'a> {
    base: &'a HashMap<String, Value>,
    /// None 表示事务内删除
    staged: HashMap<String, Option<Value>>,
}

#[async_trait]
impl DocumentTxn for MemoryTxn<'_> {
    async fn get(&mut self, key: &DocKey) -> SchedulingResult<Option<Value>> {
        if let Some(entry) = self.staged.get(key.as_str()) {
            return Ok(entry.clone());
        }
        Ok(self.base.get(key.as_str()).cloned())
    }

    async fn set(&mut self, key: &DocKey, value: Value) -> SchedulingResult<()> {
        self.staged.insert(key.as_str().to_string(), Some(value));
        Ok(())
    }

    async fn delete(&mut self, key: &DocKey) -> SchedulingResult<()> {
        self.staged.insert(key.as_str().to_string(), None);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &DocKey) -> SchedulingResult<Option<Value>> {
        let guard = self.documents.lock().await;
        Ok(guard.get(key.as_str()).cloned())
    }

    async fn set(&self, key: &DocKey, value: Value) -> SchedulingResult<()> {
        let mut guard = self.documents.lock().await;
        guard.insert(key.as_str().to_string(), value);
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> SchedulingResult<Vec<(String, Value)>> {
        let guard = self.documents.lock().await;
        let mut entries: Vec<(String, Value)> = guard
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn transaction(&self, func: TxnFunc) -> SchedulingResult<Value> {
        // 整个事务期间持锁，保证多文档读改写的原子性与隔离性
        let mut guard = self.documents.lock().await;
        let mut txn = MemoryTxn {
            base: &guard,
            staged: HashMap::new(),
        };
        let result = func(&mut txn).await;
        let MemoryTxn { staged, .. } = txn;

        match result {
            Ok(value) => {
                for (key, entry) in staged {
                    match entry {
                        Some(doc) => {
                            guard.insert(key, doc);
                        }
                        None => {
                            guard.remove(&key);
                        }
                    }
                }
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }
}
