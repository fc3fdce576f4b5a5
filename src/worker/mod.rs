//! Job intake and the worker pool.
//!
//! A stream decoder reads newline-delimited jobs from the input, pushes
//! them onto one bounded channel, and a fixed-size pool of workers drains
//! it. Malformed lines produce an `error` event and decoding resumes on the
//! next line; EOF or a shutdown signal closes the queue, lets workers drain
//! what is left, and emits a final log event.

pub mod jobs;

use crate::protocol::{JobRequest, OutputEvent};
use crate::services::{AdapterRegistry, ServiceContext};
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info};

/// Backpressure bound on queued jobs.
pub const JOB_QUEUE_CAPACITY: usize = 100;

/// Everything a worker needs to execute jobs.
#[derive(Clone)]
pub struct Pipeline {
    pub ctx: ServiceContext,
    pub registry: Arc<AdapterRegistry>,
}

/// Runs the dispatcher until EOF or `shutdown` resolves, then drains the
/// queue and returns.
pub async fn run<R, F>(input: R, shutdown: F, pipeline: Pipeline, worker_count: usize)
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = ()>,
{
    let (tx, rx) = mpsc::channel::<JobRequest>(JOB_QUEUE_CAPACITY);
    let rx = Arc::new(Mutex::new(rx));

    let mut workers = Vec::with_capacity(worker_count);
    for id in 0..worker_count {
        workers.push(tokio::spawn(worker_loop(id, rx.clone(), pipeline.clone())));
    }

    let mut lines = input.lines();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received, closing job intake");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JobRequest>(trimmed) {
                        Ok(job) => {
                            if tx.send(job).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => pipeline
                            .ctx
                            .sink
                            .emit(&OutputEvent::error(format!("JSON decode error: {err}"))),
                    }
                }
                Ok(None) => {
                    info!("stdin closed, draining remaining jobs");
                    break;
                }
                Err(err) => {
                    error!(error = %err, "failed reading job stream");
                    break;
                }
            }
        }
    }

    // Closing the channel lets workers finish queued jobs and exit.
    drop(tx);
    for worker in workers {
        let _ = worker.await;
    }
    pipeline
        .ctx
        .sink
        .emit(&OutputEvent::log("=== SIDECAR SHUTDOWN COMPLETE ==="));
}

async fn worker_loop(id: usize, rx: Arc<Mutex<mpsc::Receiver<JobRequest>>>, pipeline: Pipeline) {
    loop {
        // Lock only for the pop so siblings can claim the next job while
        // this one executes.
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };
        debug!(worker = id, action = %job.action, service = %job.service, "job claimed");

        // Per-job guard: a panicking job must not take the worker down.
        let handle = tokio::spawn(jobs::handle(pipeline.clone(), job));
        if let Err(err) = handle.await {
            if err.is_panic() {
                pipeline
                    .ctx
                    .sink
                    .emit(&OutputEvent::error(format!("Panic: {}", panic_message(err))));
            }
        }
    }
    debug!(worker = id, "worker exiting");
}

fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            if let Some(msg) = payload.downcast_ref::<&str>() {
                (*msg).to_string()
            } else if let Some(msg) = payload.downcast_ref::<String>() {
                msg.clone()
            } else {
                "unknown panic".to_string()
            }
        }
        Err(err) => err.to_string(),
    }
}
