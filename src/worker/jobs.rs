//! Per-job execution: validation, dispatch by action, per-file fan-out with
//! deadlines, and event emission.

use super::Pipeline;
use crate::error::UploadError;
use crate::http_upload;
use crate::protocol::{FileStatus, JobRequest, OutputEvent, RetryConfig};
use crate::retry;
use crate::services::viper;
use crate::services::UploadedImage;
use crate::thumbs;
use crate::validation;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// Deadline for each individual file upload, retries included.
pub const UPLOAD_DEADLINE: Duration = Duration::from_secs(180);

/// Default per-job sub-worker count for the file fan-out.
const DEFAULT_FILE_THREADS: usize = 2;

#[derive(Clone, Copy, PartialEq, Eq)]
enum UploadMode {
    /// Hard-coded host adapter selected by the service tag.
    Adapter,
    /// Data-driven upload from the job's request spec.
    Spec,
}

/// Entry point for one claimed job.
pub async fn handle(pipeline: Pipeline, mut job: JobRequest) {
    let sink = pipeline.ctx.sink.clone();

    if let Err(err) = validation::validate_job(&job) {
        sink.emit(&OutputEvent::error(format!("Invalid job: {err}")));
        return;
    }

    if let Some(limits) = &job.rate_limits {
        if let Err(err) = pipeline.ctx.limits.update(&job.service, limits) {
            sink.emit(&OutputEvent::error(format!("Invalid job: {err}")));
            return;
        }
    }

    if job.retry_config.is_none() {
        job.retry_config = Some(RetryConfig::default());
    }

    let action = job.action.clone();
    match action.as_str() {
        "upload" => run_upload_batch(&pipeline, job, UploadMode::Adapter).await,
        "http_upload" => {
            if job.http_spec.is_none() {
                sink.emit(&OutputEvent::error("http_upload requires http_spec field"));
                return;
            }
            run_upload_batch(&pipeline, job, UploadMode::Spec).await;
        }
        "login" | "verify" => handle_login(&pipeline, &job).await,
        "list_galleries" => handle_list_galleries(&pipeline, &job).await,
        "create_gallery" => handle_create_gallery(&pipeline, &job).await,
        "finalize_gallery" => handle_finalize_gallery(&pipeline, &job).await,
        "generate_thumb" => {
            // Image decode/encode is CPU work; keep it off the runtime.
            let job = job.clone();
            let _ = tokio::task::spawn_blocking(move || thumbs::generate(&sink, &job)).await;
        }
        "viper_login" => {
            let event = match viper::login(&pipeline.ctx, &job).await {
                Ok(msg) => OutputEvent::op_result(true, msg),
                Err(err) => OutputEvent::op_result(false, err.to_string()),
            };
            sink.emit(&event);
        }
        "viper_post" => {
            let event = match viper::post(&pipeline.ctx, &job).await {
                Ok(msg) => OutputEvent::op_result(true, msg),
                Err(err) => OutputEvent::op_result(false, err.to_string()),
            };
            sink.emit(&event);
        }
        // Validation closed the action set already.
        _ => {}
    }
}

fn file_threads(job: &JobRequest) -> usize {
    job.config
        .get("threads")
        .and_then(|t| t.parse::<usize>().ok())
        .filter(|t| *t > 0)
        .unwrap_or(DEFAULT_FILE_THREADS)
}

/// Fans the job's file list out to `threads` sub-workers, then emits
/// `batch_complete`. The top-level pool bounds concurrent jobs; this bounds
/// concurrent files within one job.
async fn run_upload_batch(pipeline: &Pipeline, job: JobRequest, mode: UploadMode) {
    let threads = file_threads(&job);
    let job = Arc::new(job);

    let (tx, rx) = mpsc::channel::<String>(job.files.len().max(1));
    let rx = Arc::new(Mutex::new(rx));

    let mut sub_workers = Vec::with_capacity(threads);
    for _ in 0..threads {
        let rx = rx.clone();
        let pipeline = pipeline.clone();
        let job = job.clone();
        sub_workers.push(tokio::spawn(async move {
            loop {
                let file = { rx.lock().await.recv().await };
                let Some(file) = file else {
                    break;
                };
                process_file(&pipeline, &job, &file, mode).await;
            }
        }));
    }

    for file in &job.files {
        if tx.send(file.clone()).await.is_err() {
            break;
        }
    }
    drop(tx);
    for sub in sub_workers {
        let _ = sub.await;
    }

    pipeline.ctx.sink.emit(&OutputEvent::batch_complete());
}

/// One file from `Uploading` to exactly one terminal status.
async fn process_file(pipeline: &Pipeline, job: &Arc<JobRequest>, file: &str, mode: UploadMode) {
    let sink = &pipeline.ctx.sink;
    sink.emit(&OutputEvent::file_status(file, FileStatus::Uploading));

    let retry_config = job.retry_config.clone().unwrap_or_default();
    let attempt = || {
        let pipeline = pipeline.clone();
        let job = job.clone();
        let file = file.to_string();
        async move { attempt_upload(&pipeline, &job, &file, mode).await }
    };

    let outcome = tokio::time::timeout(
        UPLOAD_DEADLINE,
        retry::retry_with_backoff(&retry_config, sink, file, attempt),
    )
    .await;

    match outcome {
        Ok(Ok(image)) => {
            sink.emit(&OutputEvent::file_result(file, image.url, image.thumb));
            sink.emit(&OutputEvent::file_status(file, FileStatus::Done));
        }
        Ok(Err(err)) => {
            sink.emit(&OutputEvent::file_status(file, FileStatus::Failed));
            sink.emit(&OutputEvent::file_error(file, err.to_string()));
        }
        Err(_) => {
            sink.emit(&OutputEvent::file_status(file, FileStatus::Timeout));
            sink.emit(&OutputEvent::file_error(file, "Upload timed out"));
        }
    }
}

async fn attempt_upload(
    pipeline: &Pipeline,
    job: &JobRequest,
    file: &str,
    mode: UploadMode,
) -> Result<UploadedImage, UploadError> {
    match mode {
        UploadMode::Spec => {
            let spec = job
                .http_spec
                .as_ref()
                .ok_or_else(|| UploadError::Other("no http_spec".to_string()))?;
            http_upload::execute(&pipeline.ctx, job, spec, file).await
        }
        UploadMode::Adapter => match pipeline.registry.get(&job.service) {
            Some(adapter) => adapter.upload(&pipeline.ctx, job, file).await,
            None => Err(UploadError::UnknownService(job.service.clone())),
        },
    }
}

async fn handle_login(pipeline: &Pipeline, job: &JobRequest) {
    let event = match pipeline.registry.get(&job.service) {
        Some(adapter) if adapter.requires_login() => {
            match adapter.login(&pipeline.ctx, job).await {
                Ok(()) if job.service == "imx.to" => {
                    OutputEvent::op_result(true, "IMX Login Verified")
                }
                Ok(()) => OutputEvent::op_result(true, "Login OK"),
                Err(err) if job.service == "imx.to" => {
                    warn!(error = %err, "imx login failed");
                    OutputEvent::op_result(false, "IMX Login Failed")
                }
                Err(err) => OutputEvent::op_result(false, err.to_string()),
            }
        }
        _ => OutputEvent::op_result(true, "No login required"),
    };
    pipeline.ctx.sink.emit(&event);
}

async fn handle_list_galleries(pipeline: &Pipeline, job: &JobRequest) {
    let galleries = match pipeline.registry.get(&job.service) {
        Some(adapter) => match adapter.list_galleries(&pipeline.ctx, job).await {
            Ok(galleries) => galleries,
            Err(err) => {
                warn!(service = %job.service, error = %err, "gallery listing failed");
                Vec::new()
            }
        },
        None => Vec::new(),
    };
    // The front-end treats the listing as best-effort: an empty list is a
    // valid answer, never an error.
    let payload = serde_json::to_value(&galleries).unwrap_or(serde_json::Value::Null);
    pipeline.ctx.sink.emit(&OutputEvent::data(payload));
}

async fn handle_create_gallery(pipeline: &Pipeline, job: &JobRequest) {
    let name = job.config.get("gallery_name").cloned().unwrap_or_default();
    let event = match pipeline.registry.get(&job.service) {
        Some(adapter) => match adapter.create_gallery(&pipeline.ctx, job, &name).await {
            Ok(gallery) => OutputEvent::op_result(true, gallery.id).with_data(gallery.data),
            Err(err) => OutputEvent::op_result(false, err.to_string()),
        },
        None => OutputEvent::op_result(false, "service not supported"),
    };
    pipeline.ctx.sink.emit(&event);
}

async fn handle_finalize_gallery(pipeline: &Pipeline, job: &JobRequest) {
    let sink = &pipeline.ctx.sink;
    let gallery_hash = job.config.get("gallery_hash").map_or("", |h| h.as_str());
    let upload_hash = job
        .config
        .get("gallery_upload_hash")
        .map_or("", |h| h.as_str());
    if gallery_hash.is_empty() || upload_hash.is_empty() {
        sink.emit(&OutputEvent::error("Missing gallery hashes"));
        return;
    }

    match pipeline.registry.get(&job.service) {
        Some(adapter) => match adapter.finalize_gallery(&pipeline.ctx, job).await {
            Ok(msg) => sink.emit(&OutputEvent::op_result(true, msg)),
            Err(err) => sink.emit(&OutputEvent::error(format!("Finalize failed: {err}"))),
        },
        // Only pixhost needs a real finalize call; everything else is done
        // the moment its uploads are.
        None => sink.emit(&OutputEvent::op_result(true, "Gallery Finalized")),
    }
}
