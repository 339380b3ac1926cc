//! Bounded worker pool between the HTTP surface and the sandbox. Each job
//! carries a one-shot reply channel; a closed reply channel is the caller
//! cancelling, and such jobs are skipped before any sandbox work starts.

use arbiter_protocol::{RunRequest, RunResponse};
use arbiter_utils::queue::Queue;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::info;

#[derive(Debug)]
pub struct Job {
    pub req: RunRequest,
    pub reply: oneshot::Sender<RunResponse>,
}

pub struct WorkerPool {
    queue: Arc<Queue<Job>>,
}

impl WorkerPool {
    /// Spawns `workers` consumers over a queue of `queue_size` slots.
    pub fn start<F, Fut>(workers: usize, queue_size: usize, handler: F) -> WorkerPool
    where
        F: Fn(RunRequest) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = RunResponse> + Send,
    {
        let queue = Arc::new(Queue::bounded(queue_size));
        for _ in 0..workers {
            let queue = queue.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                worker_loop(queue, handler).await;
            });
        }
        info!(workers, queue = queue_size, "runner worker pool started");
        WorkerPool { queue }
    }

    /// Enqueues a request, waiting for a free slot. The receiver resolves
    /// when a worker has finished the job.
    pub async fn submit(&self, req: RunRequest) -> Option<oneshot::Receiver<RunResponse>> {
        let (reply, rx) = oneshot::channel();
        self.queue.push(Job { req, reply }).await.ok()?;
        Some(rx)
    }

    pub fn shutdown(&self) {
        self.queue.close();
    }
}

async fn worker_loop<F, Fut>(queue: Arc<Queue<Job>>, handler: F)
where
    F: Fn(RunRequest) -> Fut,
    Fut: Future<Output = RunResponse>,
{
    while let Some(job) = queue.pop().await {
        if job.reply.is_closed() {
            continue;
        }
        let resp = handler(job.req).await;
        let _ = job.reply.send(resp);
    }
}
