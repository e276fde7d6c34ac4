use std::{fs, io::Write, process, time::Instant};

use tessera::{
    application::{
        context::RequestContext,
        error::{AppError, ServeError},
        minify::MinifierRegistry,
        negotiate::ClientHeaders,
        serve::AssetService,
        source::Source,
    },
    config::{self, BuildArgs, Settings},
    domain::{content_type::ContentType, error::DomainError},
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
    util::bytes::{format_bytes, savings},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
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
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Build(args) => {
            tokio::task::spawn_blocking(move || run_build(&settings, &args))
                .await
                .map_err(|err| AppError::unexpected(format!("build task failed: {err}")))?
        }
    }
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let state = HttpState::from_settings(&settings);
    info!(
        target = "tessera::main",
        op = "serve",
        root = %state.resolver.root().display(),
        groups = state.resolver.group_names().count(),
        cache_enabled = settings.cache.enabled,
        "Starting asset server"
    );

    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::bind(settings.server.addr.to_string(), err)))?;

    http::serve(listener, router, settings.server.graceful_shutdown)
        .await
        .map_err(AppError::from)
}

fn run_build(settings: &Settings, args: &BuildArgs) -> Result<(), AppError> {
    let started_at = Instant::now();
    let content_type = match args.content_type.as_deref() {
        Some(value) => value.parse::<ContentType>()?,
        None => args
            .files
            .first()
            .and_then(|path| ContentType::from_path(path))
            .ok_or_else(|| {
                DomainError::validation("cannot guess the content type; pass --type")
            })?,
    };

    let mut original_bytes = 0_u64;
    let mut sources = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let source = Source::from_path(path.clone()).map_err(ServeError::from)?;
        original_bytes += fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
        sources.push(source);
    }

    let minifiers = MinifierRegistry::from_settings(&settings.minify, &settings.html);
    let mut ctx = RequestContext::from_settings(content_type, &settings.minify, minifiers).quiet();
    ctx.encode = false;

    let output = AssetService::uncached().serve_quiet(&sources, &ctx, &ClientHeaders::default());
    if !output.success {
        return Err(AppError::unexpected(format!(
            "build failed with status {}",
            output.status
        )));
    }

    match &args.output {
        Some(path) => fs::write(path, &output.content).map_err(InfraError::from)?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&output.content)
                .and_then(|()| stdout.flush())
                .map_err(InfraError::from)?;
        }
    }

    let output_bytes = output.content.len() as u64;
    info!(
        target = "tessera::main",
        op = "build",
        content_type = %content_type,
        files = sources.len(),
        original = %format_bytes(original_bytes),
        output = %format_bytes(output_bytes),
        saved = %savings(original_bytes, output_bytes),
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "Build complete"
    );
    Ok(())
}
