// crates/server/src/progress/proxy.rs
//! Progress Proxy (spec.md 4.K): one upstream websocket connection per job,
//! fanning transformed progress frames out to any number of client
//! subscribers via a broadcast channel.
//!
//! The broadcast channel for a job is created lazily by whichever caller
//! reaches it first: a client connecting to `/ws/jobs/:id` before the job
//! has even been submitted upstream, or the scheduler once it learns the
//! job's backend prompt id. Only the scheduler ever calls [`ProgressHub::start`],
//! since only it knows the prompt id the upstream proxy needs to filter on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::frame::{ProgressFrame, UpstreamFrame};

const CHANNEL_CAPACITY: usize = 256;
const IDLE_REAP_INTERVAL: Duration = Duration::from_secs(5);
/// spec.md 4.K: a subscriber that sees no traffic for 30 seconds receives a
/// keepalive frame rather than being left to wonder if the connection died.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

struct JobChannel {
    tx: broadcast::Sender<ProgressFrame>,
    started: AtomicBool,
}

/// Owns at most one upstream connection per job id, enforced by only ever
/// spawning a proxy task while holding the map lock for that id.
pub struct ProgressHub {
    jobs: RwLock<HashMap<String, JobChannel>>,
    backend_ws_base: String,
}

impl ProgressHub {
    pub fn new(backend_ws_base: impl Into<String>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            backend_ws_base: backend_ws_base.into(),
        }
    }

    /// Subscribe to a job's progress stream. Creates the channel if this is
    /// the first caller to reach it (client or scheduler, whichever is
    /// first) but never starts the upstream proxy itself.
    pub fn subscribe(&self, job_id: &str) -> broadcast::Receiver<ProgressFrame> {
        self.ensure_channel(job_id).subscribe()
    }

    fn ensure_channel(&self, job_id: &str) -> broadcast::Sender<ProgressFrame> {
        {
            let jobs = self.jobs.read().unwrap();
            if let Some(channel) = jobs.get(job_id) {
                return channel.tx.clone();
            }
        }

        let mut jobs = self.jobs.write().unwrap();
        if let Some(channel) = jobs.get(job_id) {
            return channel.tx.clone();
        }

        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        jobs.insert(
            job_id.to_string(),
            JobChannel {
                tx: tx.clone(),
                started: AtomicBool::new(false),
            },
        );
        tx
    }

    /// Start the upstream proxy task for a job, once its backend prompt id
    /// is known. Idempotent: only the first call for a given job id spawns
    /// a task, regardless of how many subscribers arrived earlier.
    pub fn start(self: &std::sync::Arc<Self>, job_id: &str, prompt_id: &str) {
        let tx = self.ensure_channel(job_id);
        let jobs = self.jobs.read().unwrap();
        let Some(channel) = jobs.get(job_id) else {
            return;
        };
        if channel.started.swap(true, Ordering::SeqCst) {
            return;
        }
        drop(jobs);

        let hub = std::sync::Arc::clone(self);
        let job_id = job_id.to_string();
        let prompt_id = prompt_id.to_string();
        tokio::spawn(async move {
            hub.run_proxy(job_id, prompt_id, tx).await;
        });
    }

    /// Push a terminal error frame for a job that failed before an upstream
    /// connection was ever needed (e.g. submission itself failed), then
    /// drop the channel — no further frames are expected for this job.
    pub fn push_error(&self, job_id: &str, message: impl Into<String>) {
        let jobs = self.jobs.read().unwrap();
        if let Some(channel) = jobs.get(job_id) {
            let _ = channel.tx.send(ProgressFrame::Error { message: message.into() });
        }
        drop(jobs);
        self.remove(job_id);
    }

    fn remove(&self, job_id: &str) {
        self.jobs.write().unwrap().remove(job_id);
    }

    async fn run_proxy(&self, job_id: String, prompt_id: String, tx: broadcast::Sender<ProgressFrame>) {
        let url = format!("{}/ws?clientId=progress-proxy-{job_id}", self.backend_ws_base);
        let (ws_stream, _) = match tokio_tungstenite::connect_async(&url).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "progress proxy failed to connect upstream");
                let _ = tx.send(ProgressFrame::Error { message: format!("progress stream unavailable: {e}") });
                self.remove(&job_id);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();
        let mut reap_check = tokio::time::interval(IDLE_REAP_INTERVAL);
        reap_check.tick().await;
        let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
        keepalive.tick().await;
        let mut idle_since_keepalive = true;

        loop {
            tokio::select! {
                message = read.next() => {
                    match message {
                        Some(Ok(WsMessage::Text(text))) => {
                            let parsed: Result<UpstreamFrame, _> = serde_json::from_str(&text);
                            match parsed {
                                Ok(upstream) => {
                                    if upstream.prompt_id().is_some_and(|id| id != prompt_id) {
                                        continue;
                                    }
                                    let done = upstream.signals_completion();
                                    if let Some(frame) = upstream.into_progress_frame() {
                                        let _ = tx.send(frame);
                                        idle_since_keepalive = false;
                                    }
                                    if done {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    tracing::debug!(job_id, error = %e, "skipping malformed upstream frame");
                                }
                            }
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            let _ = write.send(WsMessage::Pong(data)).await;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::warn!(job_id, error = %e, "upstream progress connection error");
                            let _ = tx.send(ProgressFrame::Error { message: format!("upstream connection error: {e}") });
                            break;
                        }
                        _ => {}
                    }
                }
                _ = reap_check.tick() => {
                    if tx.receiver_count() == 0 {
                        tracing::debug!(job_id, "no subscribers left, closing progress proxy");
                        break;
                    }
                }
                _ = keepalive.tick() => {
                    if idle_since_keepalive {
                        let _ = tx.send(ProgressFrame::Keepalive);
                    }
                    idle_since_keepalive = true;
                }
            }
        }

        self.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_before_start_reuses_the_same_channel() {
        let hub = std::sync::Arc::new(ProgressHub::new("ws://127.0.0.1:1"));
        let _rx1 = hub.subscribe("job-1");
        let jobs_len_after_first = hub.jobs.read().unwrap().len();
        let _rx2 = hub.subscribe("job-1");
        let jobs_len_after_second = hub.jobs.read().unwrap().len();
        assert_eq!(jobs_len_after_first, 1);
        assert_eq!(jobs_len_after_second, 1);
    }

    #[test]
    fn push_error_removes_the_channel() {
        let hub = ProgressHub::new("ws://127.0.0.1:1");
        let _rx = hub.subscribe("job-2");
        hub.push_error("job-2", "boom");
        assert!(hub.jobs.read().unwrap().get("job-2").is_none());
    }

    #[test]
    fn push_error_is_a_no_op_without_a_subscriber() {
        let hub = ProgressHub::new("ws://127.0.0.1:1");
        hub.push_error("missing-job", "boom");
    }
}
