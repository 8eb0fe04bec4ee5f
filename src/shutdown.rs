use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 一个 watch 信道上的布尔关闭标志：订阅者等待标志翻转为 true，
/// 关闭后再订阅会立即观察到已关闭。触发是幂等的。
#[derive(Clone)]
pub struct ShutdownManager {
    flag: Arc<watch::Sender<bool>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self { flag: Arc::new(flag) }
    }

    /// 订阅关闭标志
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.flag.subscribe()
    }

    /// 翻转关闭标志，重复调用为空操作
    pub fn shutdown(&self) {
        let flipped = self.flag.send_if_modified(|stop| {
            if *stop {
                return false;
            }
            *stop = true;
            true
        });
        if flipped {
            info!("触发系统关闭，通知 {} 个订阅者", self.flag.receiver_count());
        } else {
            debug!("关闭管理器已经触发过关闭");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.flag.borrow()
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_subscribers_observe_shutdown_flag() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown());

        let mut rx1 = manager.subscribe();
        let mut rx2 = manager.subscribe();
        manager.shutdown();

        assert!(timeout(Duration::from_millis(100), rx1.wait_for(|stop| *stop))
            .await
            .is_ok());
        assert!(timeout(Duration::from_millis(100), rx2.wait_for(|stop| *stop))
            .await
            .is_ok());
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_observes_flag_immediately() {
        let manager = ShutdownManager::new();
        manager.shutdown();

        let mut rx = manager.subscribe();
        assert!(timeout(Duration::from_millis(100), rx.wait_for(|stop| *stop))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_double_shutdown_is_noop() {
        let manager = ShutdownManager::new();
        manager.shutdown();
        manager.shutdown();
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_clones_share_the_flag() {
        let manager = ShutdownManager::new();
        let cloned = manager.clone();
        cloned.shutdown();
        assert!(manager.is_shutdown());
    }
}
