use std::path::{Path, PathBuf};

use keyward_core::loader;
use keyward_sync::{Engine, PassReport, ReconcileError};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::{DaemonConfig, LogFormat};
use crate::error::{io_err, DaemonError};
use crate::http_client::HttpAccountClient;

/// Why the reconciliation worker stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The watcher's event or error stream ended.
    StreamClosed,
    /// A pass could not load the credential directory.
    Fatal(String),
    /// SIGINT or SIGTERM.
    Shutdown,
}

/// Receiving halves of the watcher callback.
struct WatchStreams {
    events: mpsc::UnboundedReceiver<Event>,
    errors: mpsc::UnboundedReceiver<notify::Error>,
}

pub fn start_blocking(config: DaemonConfig, format: LogFormat) -> Result<Completion, DaemonError> {
    init_tracing(format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Watch, seed, and reconcile until the worker completes or a termination
/// signal arrives.
pub async fn run(config: DaemonConfig) -> Result<Completion, DaemonError> {
    let acting = HttpAccountClient::new(&config.management_uri, &config.ca_file)?;
    let probe = HttpAccountClient::new(&config.management_uri, &config.ca_file)?;

    let (_watcher, streams) = watch_directory(&config.watch_dir)?;

    let engine_config = config.engine_config();
    let engine = tokio::task::spawn_blocking(move || {
        Engine::from_directory(engine_config, Box::new(acting), Box::new(probe))
    })
    .await
    .map_err(|e| join_err("seed", e))??;

    tracing::info!(
        directory = %config.watch_dir.display(),
        management_uri = %config.management_uri,
        "credential watcher started"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (done_tx, mut done_rx) = oneshot::channel::<Completion>();
    let worker = tokio::spawn(worker_task(
        engine,
        config.watch_dir.clone(),
        streams,
        shutdown_tx.subscribe(),
        done_tx,
    ));

    let completion = tokio::select! {
        completion = &mut done_rx => {
            completion.map_err(|_| DaemonError::ChannelClosed("worker completion"))?
        }
        signal = shutdown_signal() => {
            let signal = signal?;
            tracing::info!(signal, "received termination signal, shutting down");
            let _ = shutdown_tx.send(());
            done_rx
                .await
                .map_err(|_| DaemonError::ChannelClosed("worker completion"))?
        }
    };

    worker.await.map_err(|e| join_err("worker", e))?;

    match &completion {
        Completion::Fatal(message) => tracing::error!(error = %message, "worker stopped"),
        other => tracing::info!(completion = ?other, "worker stopped"),
    }
    Ok(completion)
}

fn watch_directory(dir: &Path) -> Result<(RecommendedWatcher, WatchStreams), DaemonError> {
    let (event_tx, events) = mpsc::unbounded_channel::<Event>();
    let (error_tx, errors) = mpsc::unbounded_channel::<notify::Error>();

    let mut watcher = recommended_watcher(move |result: notify::Result<Event>| match result {
        Ok(event) => {
            let _ = event_tx.send(event);
        }
        Err(err) => {
            let _ = error_tx.send(err);
        }
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    tracing::debug!(directory = %dir.display(), "watching credential directory");

    Ok((watcher, WatchStreams { events, errors }))
}

/// The single consumer of watcher notifications. Every relevant event
/// triggers a full pass; passes never overlap.
async fn worker_task(
    mut engine: Engine,
    watch_dir: PathBuf,
    mut streams: WatchStreams,
    mut shutdown_rx: broadcast::Receiver<()>,
    done: oneshot::Sender<Completion>,
) {
    let completion = loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break Completion::Shutdown,
            event = streams.events.recv() => {
                let Some(event) = event else {
                    tracing::info!(directory = %watch_dir.display(), "watcher event stream closed");
                    break Completion::StreamClosed;
                };
                if !triggers_pass(&event) {
                    continue;
                }
                tracing::debug!(kind = ?event.kind, paths = ?event.paths, "credential change detected");

                let (returned, result) = match run_pass(engine).await {
                    Ok(outcome) => outcome,
                    Err(err) => break Completion::Fatal(err.to_string()),
                };
                engine = returned;
                match result {
                    Ok(report) => log_report(&report),
                    Err(err) => {
                        tracing::error!(error = %err, "cannot load credential directory");
                        break Completion::Fatal(err.to_string());
                    }
                }
            }
            error = streams.errors.recv() => {
                let Some(error) = error else {
                    tracing::info!(directory = %watch_dir.display(), "watcher error stream closed");
                    break Completion::StreamClosed;
                };
                tracing::error!(error = %error, directory = %watch_dir.display(), "watcher error");
            }
        }
    };

    let _ = done.send(completion);
}

/// Run one pass off the async threads. The engine moves into the blocking
/// task and comes back with the result.
async fn run_pass(
    mut engine: Engine,
) -> Result<(Engine, Result<PassReport, ReconcileError>), DaemonError> {
    tokio::task::spawn_blocking(move || {
        let result = engine.reconcile();
        (engine, result)
    })
    .await
    .map_err(|e| join_err("reconciliation", e))
}

fn triggers_pass(event: &Event) -> bool {
    !matches!(event.kind, EventKind::Access(_))
        && event.paths.iter().any(|path| loader::is_credential_file(path))
}

fn log_report(report: &PassReport) {
    let committed = report.committed();
    match report.failure() {
        Some((id, error)) => tracing::warn!(
            account = %id,
            error = %error,
            committed = committed.len(),
            "reconciliation pass stopped early; retrying on next change"
        ),
        None if committed.is_empty() => tracing::debug!(
            unchanged = report.unchanged(),
            "reconciliation pass found nothing to apply"
        ),
        None => tracing::info!(
            accounts = ?committed.iter().map(|id| id.as_str()).collect::<Vec<_>>(),
            unchanged = report.unchanged(),
            "reconciliation pass completed"
        ),
    }
}

async fn shutdown_signal() -> Result<&'static str, DaemonError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).map_err(|e| io_err("SIGTERM handler", e))?;
        tokio::select! {
            _ = terminate.recv() => Ok("SIGTERM"),
            result = tokio::signal::ctrl_c() => result
                .map(|()| "SIGINT")
                .map_err(|e| io_err("SIGINT handler", e)),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .map_err(|e| io_err("ctrl-c handler", e))?;
        Ok("ctrl-c")
    }
}

fn join_err(task: &'static str, err: tokio::task::JoinError) -> DaemonError {
    DaemonError::Join {
        task,
        message: err.to_string(),
    }
}

/// Install the global subscriber. `log` records from the library crates are
/// bridged into it.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
