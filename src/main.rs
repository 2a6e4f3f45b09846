mod cli;
mod error;
mod telemetry;

use crate::cli::Args;
use crate::error::{ErrorKind, Result};
use clap::Parser;
use exn::ResultExt;
use reel_config::{Config, LogConfig};
use reel_ingest::{Ingestor, Session};
use reel_storage::{Extensions, MediaDir};
use reel_transcode::{Ffmpeg, Passthrough, TranscoderHandle};
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};

type ListenerResult = reel_ingest::error::Result<()>;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config = match reel_config::load(args.config.as_deref()).or_raise(|| ErrorKind::Config) {
        Ok(config) => config,
        Err(err) => {
            // Nothing configured yet; log the failure with the defaults.
            let _ = telemetry::init(&LogConfig::default());
            tracing::error!("{err:?}");
            return ExitCode::FAILURE;
        },
    };
    if let Err(err) = telemetry::init(&config.log) {
        eprintln!("{err:?}");
        return ExitCode::FAILURE;
    }
    if args.check {
        tracing::info!("Configuration is valid");
        return ExitCode::SUCCESS;
    }
    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(config: Config) -> Result<()> {
    tracing::info!("reel v{}", env!("CARGO_PKG_VERSION"));
    let root = storage_root(&config)?;
    let dir = Arc::new(MediaDir::new(&root).or_raise(|| ErrorKind::Storage)?);
    tracing::info!(dir = %root.display(), "Storing uploads");
    let session = Session::new(dir, transcoder(&config)?);
    let ingest = Arc::new(Ingestor::new(config.upload.thread_pool_size, config.upload.queue_size, session));
    tracing::info!(
        workers = config.upload.thread_pool_size,
        queue = config.upload.queue_size,
        "Upload pipeline ready"
    );

    // Bind everything before serving anything: a bind failure is fatal.
    let socket = if config.socket.enabled {
        Some(reel_ingest::bind(config.socket.bind).await.or_raise(|| ErrorKind::Listener)?)
    } else {
        None
    };
    let http = if config.http.enabled {
        Some(reel_ingest::bind(config.http.bind).await.or_raise(|| ErrorKind::Listener)?)
    } else {
        None
    };

    let (stop, stopping) = watch::channel(());
    let mut servers = JoinSet::new();
    if let Some(listener) = socket {
        let ingest = Arc::clone(&ingest);
        let stopped = stopped(stopping.clone());
        servers.spawn(async move {
            reel_ingest::serve_socket(listener, ingest, stopped).await;
            Ok(())
        });
    }
    if let Some(listener) = http {
        let router = reel_ingest::router(Arc::clone(&ingest), Extensions::new(&config.listing.extensions));
        servers.spawn(reel_ingest::serve_http(listener, router, stopped(stopping.clone())));
    }

    let result = supervise(servers, stop, shutdown_signal()).await;
    ingest.shutdown().await;
    tracing::info!("Stopped");
    result
}

/// Run the listeners until `shutdown` resolves or one of them stops on its
/// own, then stop the rest.
async fn supervise(
    mut servers: JoinSet<ListenerResult>,
    stop: watch::Sender<()>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let mut result = Ok(());
    tokio::select! {
        () = shutdown => tracing::info!("Shutting down; finishing admitted uploads"),
        Some(joined) = servers.join_next() => {
            tracing::error!("A listener stopped unexpectedly; shutting down");
            result = Err(settle(joined).err().unwrap_or_else(|| ErrorKind::Listener.into()));
        },
    }
    let _ = stop.send(());
    while let Some(joined) = servers.join_next().await {
        if let Err(err) = settle(joined) {
            result = Err(err);
        }
    }
    result
}

fn settle(joined: std::result::Result<ListenerResult, JoinError>) -> Result<()> {
    match joined {
        Ok(served) => served.or_raise(|| ErrorKind::Listener),
        Err(e) => {
            tracing::error!(error = %e, "Listener task failed");
            exn::bail!(ErrorKind::Listener)
        },
    }
}

/// Relative storage directories resolve against the working directory.
fn storage_root(config: &Config) -> Result<PathBuf> {
    std::path::absolute(&config.upload.storage_dir).or_raise(|| ErrorKind::Storage)
}

/// An explicitly configured ffmpeg must exist. A missing one found by
/// searching `PATH` only turns transcoding off.
fn transcoder(config: &Config) -> Result<TranscoderHandle> {
    let settings = &config.transcode;
    if !settings.enabled {
        tracing::info!("Transcoding disabled");
        return Ok(Arc::new(Passthrough));
    }
    match Ffmpeg::new(settings.ffmpeg.clone()) {
        Ok(ffmpeg) => Ok(Arc::new(ffmpeg.with_timeout(settings.timeout()))),
        Err(err) if settings.ffmpeg.is_some() => Err(err).or_raise(|| ErrorKind::Transcode),
        Err(err) => {
            tracing::warn!(error = ?err, "ffmpeg unavailable; uploads will be stored as received");
            Ok(Arc::new(Passthrough))
        },
    }
}

async fn stopped(mut stopping: watch::Receiver<()>) {
    // Also resolves if the sender is dropped.
    let _ = stopping.changed().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Could not listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
