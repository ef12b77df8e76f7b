//! Graceful Shutdown

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Shutdown 控制器
///
/// 关闭是一次性的状态，之后才开始等待的任务也会立即返回
#[derive(Clone)]
pub struct ShutdownController {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        info!("Triggering shutdown");
        self.sender.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// 等待关闭
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.sender.subscribe();
        async move {
            // 所有控制器都被释放时同样返回
            let _ = receiver.wait_for(|stopped| *stopped).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// 运行任务直到完成或收到关闭信号
pub async fn run_with_shutdown<Fut, T>(shutdown: &ShutdownController, task: Fut) -> Option<T>
where
    Fut: Future<Output = T>,
{
    tokio::select! {
        result = task => Some(result),
        _ = shutdown.wait() => {
            info!("Task cancelled due to shutdown");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_late_waiter_sees_shutdown() {
        let shutdown = ShutdownController::new();
        assert!(!shutdown.is_shutdown());

        shutdown.shutdown();
        assert!(shutdown.is_shutdown());
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_with_shutdown_cancels_task() {
        let shutdown = ShutdownController::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.shutdown();
        });

        let result = run_with_shutdown(&shutdown, std::future::pending::<()>()).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_run_with_shutdown_returns_result() {
        let shutdown = ShutdownController::new();
        assert_eq!(run_with_shutdown(&shutdown, async { 7 }).await, Some(7));
    }
}
