use crate::shared::config::PoolConfig;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;

type Task = BoxFuture<'static, ()>;

#[derive(Default)]
struct PoolState {
    in_flight: AtomicUsize,
    dropped: AtomicU64,
    idle: Notify,
}

impl PoolState {
    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// キュー長に上限のあるワーカープール
///
/// `submit` は待たずに戻る。キューが一杯ならタスクを捨てて警告を出す。
pub struct TaskPool {
    name: &'static str,
    sender: mpsc::Sender<Task>,
    state: Arc<PoolState>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskPool {
    pub fn new(name: &'static str, config: PoolConfig) -> Self {
        let (sender, receiver) = mpsc::channel::<Task>(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let state = Arc::new(PoolState::default());

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    loop {
                        let task = { receiver.lock().await.recv().await };
                        let Some(task) = task else {
                            break;
                        };
                        if let Err(payload) = AssertUnwindSafe(task).catch_unwind().await {
                            let message = payload
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| payload.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "unknown panic".to_string());
                            tracing::error!(
                                target: "popularity::pool",
                                pool = name,
                                worker,
                                panic = %message,
                                "task panicked"
                            );
                        }
                        state.finish_one();
                    }
                })
            })
            .collect();

        Self {
            name,
            sender,
            state,
            workers,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// タスクを投入する。受け付けたら true
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.state.in_flight.fetch_add(1, Ordering::AcqRel);
        match self.sender.try_send(Box::pin(task)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.state.finish_one();
                let dropped = self.state.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    target: "popularity::pool",
                    pool = self.name,
                    dropped,
                    "queue full, dropping task"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.state.finish_one();
                tracing::warn!(target: "popularity::pool", pool = self.name, "pool closed, dropping task");
                false
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::Acquire)
    }

    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    /// 投入済みのタスクがすべて終わるまで待つ
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// 新規投入を止め、キューに残ったタスクを処理してからワーカーを終了する
    pub async fn shutdown(self) {
        let Self {
            name,
            sender,
            workers,
            ..
        } = self;
        drop(sender);
        for worker in workers {
            if let Err(err) = worker.await {
                tracing::warn!(target: "popularity::pool", pool = name, error = %err, "worker ended abnormally");
            }
        }
    }
}
