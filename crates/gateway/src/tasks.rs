//! # タスクスーパーバイザ
//!
//! レスポンスと切り離して実行するタスク（Webhook送信、開発モードのポーリング）を管理する。
//! 各タスクには期限があり、期限切れ・シャットダウン時にはFutureがdropされる。
//! dropによりタスクが保持するチャネル等も解放される。

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// シャットダウン時にタスクの終了を待つ上限
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// タスクの終了理由。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    TimedOut,
    Cancelled,
}

/// `TaskTracker` と `CancellationToken` による切り離しタスクの管理。
#[derive(Clone, Default)]
pub struct TaskSupervisor {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 期限付きでタスクを起動する。
    pub fn spawn<F>(&self, name: &'static str, deadline: Duration, task: F) -> JoinHandle<TaskOutcome>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::warn!(task = name, "シャットダウンによりタスクを中断");
                    TaskOutcome::Cancelled
                }
                result = tokio::time::timeout(deadline, task) => match result {
                    Ok(()) => TaskOutcome::Completed,
                    Err(_) => {
                        tracing::warn!(task = name, deadline_secs = deadline.as_secs(), "タスクが期限を超過");
                        TaskOutcome::TimedOut
                    }
                },
            }
        })
    }

    /// 実行中のタスク数
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// 新規タスクの受付を止め、実行中のタスクを中断して終了を待つ。
    pub async fn shutdown(&self) {
        tracing::info!(active = self.active(), "切り離しタスクを停止します");
        self.tracker.close();
        self.cancel.cancel();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_secs = SHUTDOWN_GRACE.as_secs(),
                "タスクの停止待ちがタイムアウトしました"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 期限内に終わるタスクはCompletedになることを確認
    #[tokio::test]
    async fn test_completed() {
        let supervisor = TaskSupervisor::new();
        let handle = supervisor.spawn("quick", Duration::from_secs(5), async {});
        assert_eq!(handle.await.unwrap(), TaskOutcome::Completed);
    }

    /// 期限切れでFutureがdropされ、保持していたSenderも閉じることを確認
    #[tokio::test(start_paused = true)]
    async fn test_deadline_drops_task() {
        let supervisor = TaskSupervisor::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel::<u8>(1);
        let handle = supervisor.spawn("slow", Duration::from_secs(1), async move {
            let _tx = tx;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        assert_eq!(handle.await.unwrap(), TaskOutcome::TimedOut);
        assert!(rx.recv().await.is_none());
    }

    /// シャットダウンで実行中のタスクが中断されることを確認
    #[tokio::test]
    async fn test_shutdown_cancels() {
        let supervisor = TaskSupervisor::new();
        let handle = supervisor.spawn("forever", Duration::from_secs(3600), async {
            futures::future::pending::<()>().await;
        });
        assert_eq!(supervisor.active(), 1);
        supervisor.shutdown().await;
        assert_eq!(handle.await.unwrap(), TaskOutcome::Cancelled);
        assert_eq!(supervisor.active(), 0);
    }
}
