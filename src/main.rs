use std::{future::IntoFuture, net::SocketAddr, process, sync::Arc};

use chartd::{
    application::{
        error::AppError,
        render::{
            Delivery, RenderController, RenderDraft, RenderLimits, RenderOutcome, RenderPipeline,
        },
    },
    cache::{CacheConfig, RenderCache, spawn_sweeper},
    config::{self, Command, RenderArgs, Settings},
    infra::{
        engine::CommandEngine,
        error::InfraError,
        http::{self, RouterState},
        storage::ChartStorage,
        telemetry,
    },
};
use serde_json::Value;
use tokio::{io::AsyncWriteExt, net::TcpListener, sync::watch};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    let command = cli_args
        .resolved_command()
        .map_err(config::LoadError::from)?;

    match command {
        Command::Serve(_) => {
            telemetry::init(&settings.logging)?;
            run_serve(settings).await
        }
        Command::Render(args) => {
            // stdout may carry the chart bytes
            telemetry::init_with_writer(&settings.logging, std::io::stderr)?;
            run_render(settings, *args).await
        }
    }
}

fn build_pipeline(settings: &Settings) -> Result<Arc<RenderPipeline>, AppError> {
    let engine = Arc::new(CommandEngine::new(
        settings.render.engine_command.clone(),
        settings.render.engine_args.clone(),
    ));
    let controller = Arc::new(RenderController::new(
        engine,
        RenderLimits {
            concurrency: settings.render.concurrency.get(),
            timeout: settings.render.timeout,
            max_queue: settings.render.max_queue,
        },
    ));

    let cache_config = CacheConfig::from(&settings.cache);
    let cache = cache_config
        .enabled
        .then(|| Arc::new(RenderCache::new(&cache_config)));

    let storage = ChartStorage::from_settings(&settings.storage).map_err(InfraError::from)?;

    Ok(Arc::new(RenderPipeline::new(
        cache,
        controller,
        Arc::new(storage),
    )))
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let pipeline = build_pipeline(&settings)?;
    tokio::fs::create_dir_all(pipeline.storage().local().directory())
        .await
        .map_err(InfraError::from)?;

    let sweeper = match (pipeline.cache(), settings.cache.sweep_interval) {
        (Some(cache), Some(every)) => Some(spawn_sweeper(cache.clone(), every)),
        _ => None,
    };

    let state = RouterState::new(pipeline.clone(), &settings.server, &settings.security);
    let router = http::build_router(state, &settings.security);

    let listener = TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "chartd::serve",
        addr = %settings.server.addr,
        storage = pipeline.storage().mode().as_str(),
        cache_enabled = pipeline.cache().is_some(),
        concurrency = settings.render.concurrency.get(),
        "chartd listening"
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let controller = pipeline.controller().clone();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        controller.close();
        let _ = shutdown_tx.send(true);
    })
    .into_future();

    let grace = settings.server.graceful_shutdown;
    let drain_deadline = async move {
        if shutdown_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(grace).await;
    };

    let result = tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))
        }
        () = drain_deadline => {
            warn!(
                target = "chartd::serve",
                grace_ms = grace.as_millis() as u64,
                in_flight = pipeline.controller().in_flight(),
                "graceful shutdown timed out; dropping open connections"
            );
            Ok(())
        }
    };

    if let Some(handle) = sweeper {
        handle.abort();
    }
    info!(target = "chartd::serve", "chartd stopped");
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target = "chartd::serve", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(target = "chartd::serve", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!(target = "chartd::serve", "shutdown signal received; draining requests");
}

async fn run_render(settings: Settings, args: RenderArgs) -> Result<(), AppError> {
    let raw = tokio::fs::read(&args.spec)
        .await
        .map_err(InfraError::from)?;
    let spec: Value = serde_json::from_slice(&raw).map_err(|err| {
        AppError::validation(format!("{} is not valid JSON: {err}", args.spec.display()))
    })?;

    let pipeline = build_pipeline(&settings)?;
    let delivery = if args.persist {
        Delivery::Reference
    } else {
        Delivery::Inline
    };
    let draft = RenderDraft {
        spec: Some(spec),
        width: args.width,
        height: args.height,
        format: args.format,
    };

    match pipeline.execute(draft, delivery).await? {
        RenderOutcome::Inline { result, .. } => match &args.output {
            Some(path) => {
                tokio::fs::write(path, &result.payload)
                    .await
                    .map_err(InfraError::from)?;
                info!(
                    target = "chartd::render",
                    path = %path.display(),
                    bytes = result.len(),
                    "chart written"
                );
            }
            None => {
                let mut stdout = tokio::io::stdout();
                stdout
                    .write_all(&result.payload)
                    .await
                    .map_err(InfraError::from)?;
                stdout.flush().await.map_err(InfraError::from)?;
            }
        },
        RenderOutcome::Reference { target, .. } => {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(format!("{}\n", target.url()).as_bytes())
                .await
                .map_err(InfraError::from)?;
            stdout.flush().await.map_err(InfraError::from)?;
        }
    }

    Ok(())
}
