use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// 时间源端口
///
/// 服务显式注入时钟而不是直接取系统时间，锁过期、退避与
/// 饥饿防止等与时间相关的行为因此可以在测试中精确控制。
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 可手动推进的固定时钟，测试用
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("时钟锁中毒") = now;
    }

    pub fn advance(&self, delta: Duration) {
        let mut guard = self.now.lock().expect("时钟锁中毒");
        *guard += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("时钟锁中毒")
    }
}
