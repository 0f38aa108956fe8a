use std::{process, sync::Arc, time::Duration};

use anteprima::{
    application::{
        error::AppError,
        lint::LintService,
        preview::{PreviewOutcome, PreviewRequest, PreviewService},
    },
    config,
    infra::{error::InfraError, http, telemetry},
    presentation::views,
};
use tokio::io::AsyncWriteExt;
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

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Build(args) => run_build(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let preview = Arc::new(PreviewService::new(settings.preview.clone())?);
    let lint = Arc::new(LintService::new(settings.lint.clone()));

    // /resource falls back to the project configuration directory when no
    // explicit root is set; an empty conf dir never becomes a root.
    let resource_root = settings.server.project_root.clone().or_else(|| {
        settings
            .preview
            .conf_dir
            .clone()
            .filter(|dir| !dir.as_os_str().is_empty())
    });

    let router = http::build_router(http::HttpState {
        preview,
        lint,
        resource_root,
    });

    let listener = tokio::net::TcpListener::bind(settings.server.bind_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "anteprima::serve",
        addr = %settings.server.bind_addr,
        "preview service listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(settings.server.graceful_shutdown))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    info!(target = "anteprima::serve", "shutdown completed");
    Ok(())
}

async fn shutdown_signal(grace: Duration) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!(
        target = "anteprima::serve",
        grace_seconds = grace.as_secs(),
        "shutdown signal received; draining connections"
    );
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        warn!(
            target = "anteprima::serve",
            "graceful shutdown period elapsed; exiting"
        );
        process::exit(0);
    });
}

async fn run_build(settings: config::Settings, args: config::BuildArgs) -> Result<(), AppError> {
    let preview = PreviewService::new(settings.preview.clone())?;
    let request = PreviewRequest::new(args.document.clone());

    match preview.render(&request).await {
        PreviewOutcome::Rendered { html } => {
            write_output(args.output.as_deref(), &html).await?;
            Ok(())
        }
        PreviewOutcome::Superseded => Err(AppError::unexpected(
            "one-shot build was superseded; this should not happen",
        )),
        PreviewOutcome::Failed { error } => {
            // The diagnostic page still goes to the requested output so the
            // caller has something to show; the exit code reports failure.
            write_output(args.output.as_deref(), &views::failure_page(&error)).await?;
            Err(AppError::unexpected(format!(
                "preview build failed for `{}`: {error}",
                args.document.display()
            )))
        }
    }
}

async fn write_output(target: Option<&std::path::Path>, html: &str) -> Result<(), AppError> {
    match target {
        Some(path) => tokio::fs::write(path, html)
            .await
            .map_err(|err| AppError::from(InfraError::from(err))),
        None => {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(html.as_bytes())
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            stdout
                .flush()
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))
        }
    }
}
