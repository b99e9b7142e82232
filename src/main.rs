//! Evalbroker server entry point.
//!
//! Grounded on the teacher's `ebeans` binary
//! (`examples/SeanGeb-beanstalk-rs/src/bin/ebeans/main.rs`): clap-parsed
//! args, a debug/JSON logging switch, a `CancellationToken` driven by
//! `ctrl_c`, and an `ExitCode`-returning `main`.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

use evalbroker::config::{Config, Registry};
use evalbroker::http::{build_router, AppState};
use evalbroker::lifecycle::LifecycleEngine;
use evalbroker::objectstore::ObjectStore;
use evalbroker::queue::Broker;
use evalbroker::resultstore::ResultStore;
use evalbroker::worker::WorkerPool;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
struct Args {
    /// Enables human-friendly, non-JSON logging.
    #[arg(short, long, default_value_t)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(error) => {
            eprintln!("failed to load configuration: {error:#}");
            return ExitCode::from(2);
        }
    };

    let file_appender = tracing_appender::rolling::never(
        config.log_file.parent().unwrap_or_else(|| std::path::Path::new(".")),
        config
            .log_file
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("evalbroker.log")),
    );
    let (writer, _guard) = tracing_appender::non_blocking(file_appender);
    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .with_writer(writer)
            .init();
    } else {
        tracing_subscriber::fmt().json().with_writer(writer).init();
    }

    let registry = match Registry::load(&config.tasks_config) {
        Ok(r) => Arc::new(r),
        Err(error) => {
            error!(%error, "failed to load use-case registry");
            return ExitCode::from(2);
        }
    };

    let object_store = match ObjectStore::new(
        config.object_store_root.clone(),
        config.backup_store_root.clone(),
    ) {
        Ok(s) => s,
        Err(error) => {
            error!(%error, "failed to initialize object store");
            return ExitCode::from(2);
        }
    };

    let broker = Broker::new();
    let result_store = ResultStore::new(config.result_store_ttl);
    let config = Arc::new(config);

    let lifecycle = Arc::new(LifecycleEngine::new(
        broker.clone(),
        result_store.clone(),
        object_store.clone(),
        registry.clone(),
        config.cancel_grace,
    ));

    let worker_pool = WorkerPool::new(
        broker.clone(),
        registry.clone(),
        object_store.clone(),
        result_store.clone(),
        config.clone(),
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            }
            cancel.cancel();
        });
    }

    let mut background = worker_pool.spawn();
    background.push(tokio::spawn(
        broker.clone().run_reaper(std::time::Duration::from_secs(5)),
    ));
    background.push(tokio::spawn(
        result_store.clone().run_sweeper(std::time::Duration::from_secs(60)),
    ));

    let state = AppState {
        registry,
        broker,
        result_store,
        object_store,
        lifecycle,
        config: config.clone(),
    };
    let app = build_router(state);

    let listener = match TcpListener::bind(&config.bind_addr).await {
        Ok(l) => l,
        Err(error) => {
            error!(%error, addr = %config.bind_addr, "failed to bind listener");
            for handle in background {
                handle.abort();
            }
            return ExitCode::from(111);
        }
    };

    info!(addr = %config.bind_addr, "evalbroker listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;

    for handle in background {
        handle.abort();
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "server error");
            ExitCode::FAILURE
        }
    }
}
