use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use serde_json::Value;
use tokio::{fs, net::TcpListener, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pdfstract::{
    AppState,
    chunkers::ChunkParams,
    comparison::{
        BatchConvert, SubmitComparison, Upload,
        batch::{
            BATCH_COMPARISON_REPORT, BATCH_REPORT, compare_batch, convert_batch, discover_pdfs,
        },
    },
    config::load_config,
    providers::OutputFormat,
    router,
    storage::StorageManager,
};

#[derive(Parser)]
#[command(
    name = "pdfstract",
    version,
    about = "Run and compare PDF extraction libraries, then chunk their output"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP service (default).
    Serve,
    /// List extraction libraries and their availability.
    Libs,
    /// List chunking strategies and their parameters.
    Chunkers,
    /// Download models for a library ahead of its first use.
    Prepare {
        library: Option<String>,
        #[arg(long, conflicts_with = "library")]
        all: bool,
    },
    /// Convert a PDF with a single library.
    Convert {
        file: PathBuf,
        #[arg(short, long)]
        library: String,
        #[arg(short, long, default_value = "markdown")]
        format: OutputFormat,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Convert a PDF with several libraries and write the result bundle.
    Compare {
        file: PathBuf,
        #[arg(short = 'l', long = "library", required = true)]
        libraries: Vec<String>,
        #[arg(short, long, default_value = "markdown")]
        format: OutputFormat,
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Convert every matching PDF in a directory with one library.
    Batch {
        input_dir: PathBuf,
        #[arg(short, long)]
        library: String,
        #[arg(short, long, default_value = "markdown")]
        format: OutputFormat,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, default_value_t = 2)]
        parallel: usize,
        #[arg(long, default_value = "*.pdf")]
        pattern: String,
        /// Record failures as skipped and exit successfully.
        #[arg(long)]
        skip_errors: bool,
    },
    /// Run several libraries over every PDF in a directory and report success rates.
    BatchCompare {
        input_dir: PathBuf,
        #[arg(short = 'l', long = "library", required = true)]
        libraries: Vec<String>,
        #[arg(short, long, default_value = "markdown")]
        format: OutputFormat,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        max_files: Option<usize>,
    },
    /// Chunk a text file, or a PDF converted with `--library` first.
    Chunk {
        file: PathBuf,
        #[arg(short, long)]
        chunker: String,
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
        #[arg(short, long)]
        library: Option<String>,
        #[arg(short, long, default_value = "markdown")]
        format: OutputFormat,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = %err, "pdfstract failed");
        for (depth, cause) in err.chain().skip(1).enumerate() {
            error!(cause_depth = depth + 1, cause = %cause, "caused by");
        }
        eprintln!("pdfstract failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    if let Err(err) = dotenv() {
        if !err.not_found() {
            return Err(err).context("Problem loading .env file");
        }
    }

    let config = load_config()
        .await
        .context("Failed to load application configuration")?;
    let (state, mut storage_manager) = AppState::build(config).await?;

    let outcome = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(state.clone()).await,
        Command::Libs => {
            list_libraries(&state);
            Ok(())
        }
        Command::Chunkers => {
            list_chunkers(&state);
            Ok(())
        }
        Command::Prepare { library, all } => prepare(&state, library, all).await,
        Command::Convert {
            file,
            library,
            format,
            output,
        } => convert(&state, &file, &library, format, output.as_deref()).await,
        Command::Compare {
            file,
            libraries,
            format,
            output,
        } => compare(&state, &file, libraries, format, &output).await,
        Command::Batch {
            input_dir,
            library,
            format,
            output,
            parallel,
            pattern,
            skip_errors,
        } => {
            let request = BatchConvert {
                library,
                format,
                output_dir: output,
                parallel,
                skip_errors,
            };
            batch(&state, &input_dir, &pattern, &request).await
        }
        Command::BatchCompare {
            input_dir,
            libraries,
            format,
            output,
            max_files,
        } => batch_compare(&state, &input_dir, &libraries, format, &output, max_files).await,
        Command::Chunk {
            file,
            chunker,
            params,
            library,
            format,
            output,
        } => {
            let params: ChunkParams = params.into_iter().collect();
            chunk(
                &state,
                &file,
                &chunker,
                &params,
                library.as_deref(),
                format,
                output.as_deref(),
            )
            .await
        }
    };

    state.comparisons.shutdown().await;
    finalize(&mut storage_manager).await;
    outcome
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn finalize(storage_manager: &mut StorageManager) {
    if let Err(err) = storage_manager.finalize_all().await {
        warn!(error = %err, "Failed to finalize storages");
    }
}

async fn serve(state: Arc<AppState>) -> Result<()> {
    let server = &state.config.server;
    let addr_string = format!("{}:{}", server.host, server.port);
    let addr = addr_string
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid server address: {addr_string}"))?;
    info!(host = %server.host, port = server.port, "Loaded configuration");

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind TCP listener on {addr}"))?;
    info!(%addr, "pdfstract server listening");

    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server encountered a fatal error")
}

fn list_libraries(state: &AppState) {
    println!("{:<16} {:<10} {:<14} DETAILS", "LIBRARY", "AVAILABLE", "MODELS");
    for info in state.converters.list() {
        let models = serde_json::to_value(info.preparation_status)
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_default();
        let details = info
            .error
            .or(info.preparation_error)
            .unwrap_or_default();
        println!(
            "{:<16} {:<10} {:<14} {}",
            info.name,
            if info.available { "yes" } else { "no" },
            models,
            details
        );
    }
}

fn list_chunkers(state: &AppState) {
    for info in state.chunkers.list() {
        let status = if info.available { "available" } else { "unavailable" };
        println!("{} ({status}): {}", info.name, info.description);
        for (name, spec) in &info.parameters {
            let default = spec
                .default
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_else(|| "required".to_string());
            let kind = format!("{:?}", spec.kind).to_lowercase();
            println!(
                "    {name:<28} {kind:<8} default {default:<10} {}",
                spec.description
            );
        }
    }
}

async fn prepare(state: &AppState, library: Option<String>, all: bool) -> Result<()> {
    let targets = match (library, all) {
        (Some(library), _) => vec![library],
        (None, true) => state
            .converters
            .list()
            .into_iter()
            .filter(|info| info.available && info.requires_preparation)
            .map(|info| info.name)
            .collect(),
        (None, false) => bail!("name a library or pass --all"),
    };

    let mut failures = 0usize;
    for name in targets {
        match state.converters.prepare(&name).await {
            Ok(outcome) => println!("{}", outcome.message(&name)),
            Err(err) => {
                failures += 1;
                eprintln!("{err}");
            }
        }
    }

    if failures > 0 {
        bail!("{failures} library preparation(s) failed");
    }
    Ok(())
}

async fn convert(
    state: &AppState,
    file: &Path,
    library: &str,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let conversion = state
        .comparisons
        .convert_path(library, file, format)
        .await
        .with_context(|| format!("Conversion of {} with {library} failed", file.display()))?;
    info!(library = %library, duration_seconds = conversion.duration_seconds, "Conversion successful");

    let bytes = conversion.content.into_bytes()?;
    write_output(output, &bytes).await
}

async fn compare(
    state: &AppState,
    file: &Path,
    libraries: Vec<String>,
    format: OutputFormat,
    output: &Path,
) -> Result<()> {
    let bytes = fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{} has no file name", file.display()))?;

    let submitted = state
        .comparisons
        .submit(SubmitComparison {
            upload: Upload::new(filename, bytes),
            libraries,
            format,
        })
        .await?;
    let task_id = submitted.task.task_id;

    let snapshot = state
        .comparisons
        .wait(&task_id, Duration::from_millis(250))
        .await?;
    for entry in &snapshot.entries {
        println!(
            "{:<16} {:<8} {:>8.2}s {}",
            entry.library_name,
            entry.status.as_str(),
            entry.duration_seconds.unwrap_or_default(),
            entry
                .output_size_bytes
                .map(|size| format!("{size} bytes"))
                .or_else(|| entry.error_message.clone())
                .unwrap_or_default()
        );
    }

    let (archive_name, archive) = state.comparisons.bundle(&task_id).await?;
    fs::create_dir_all(output)
        .await
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let archive_path = output.join(archive_name);
    fs::write(&archive_path, archive)
        .await
        .with_context(|| format!("Failed to write {}", archive_path.display()))?;
    println!("Task {task_id} {}, bundle saved to {}", snapshot.task.status, archive_path.display());
    Ok(())
}

async fn batch(
    state: &AppState,
    input_dir: &Path,
    pattern: &str,
    request: &BatchConvert,
) -> Result<()> {
    let files = discover_pdfs(input_dir, pattern, None).await?;
    if files.is_empty() {
        warn!(dir = %input_dir.display(), pattern = %pattern, "No PDF files found");
        return Ok(());
    }
    if let Err(err) = state.converters.get(&request.library) {
        bail!("{err}. available: {}", available_libraries(state));
    }

    let report = convert_batch(&state.converters, input_dir, &files, request).await?;
    println!("Total files   {}", report.total_files);
    println!("Successful    {}", report.statistics.success);
    println!("Failed        {}", report.statistics.failed);
    println!("Skipped       {}", report.statistics.skipped);
    println!("Success rate  {:.1}%", report.success_rate());
    println!(
        "Report saved to {}",
        report.output_directory.join(BATCH_REPORT).display()
    );

    if report.statistics.failed > 0 && !request.skip_errors {
        bail!("{} file(s) failed to convert", report.statistics.failed);
    }
    Ok(())
}

async fn batch_compare(
    state: &AppState,
    input_dir: &Path,
    libraries: &[String],
    format: OutputFormat,
    output: &Path,
    max_files: Option<usize>,
) -> Result<()> {
    let files = discover_pdfs(input_dir, "*.pdf", max_files).await?;
    if files.is_empty() {
        warn!(dir = %input_dir.display(), "No PDF files found");
        return Ok(());
    }
    for library in libraries {
        if let Err(err) = state.converters.get(library) {
            bail!("{err}. available: {}", available_libraries(state));
        }
    }

    let report =
        compare_batch(&state.converters, input_dir, &files, libraries, format, output).await?;
    println!("{:<16} {:>12} {:>14}", "LIBRARY", "SUCCESS RATE", "AVG SIZE (KB)");
    for summary in report.summaries() {
        println!(
            "{:<16} {:>11.1}% {:>14.1}",
            summary.library, summary.success_rate, summary.average_size_kb
        );
    }
    println!(
        "Report saved to {}",
        output.join(BATCH_COMPARISON_REPORT).display()
    );
    Ok(())
}

fn available_libraries(state: &AppState) -> String {
    state.converters.names().join(", ")
}

async fn chunk(
    state: &AppState,
    file: &Path,
    chunker: &str,
    params: &ChunkParams,
    library: Option<&str>,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let result = match library {
        Some(library) => {
            state
                .comparisons
                .convert_and_chunk_path(file, library, format, chunker, params)
                .await?
                .chunking
        }
        None => {
            let text = fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            state.comparisons.chunk(chunker, text, params).await?
        }
    };

    let json = serde_json::to_vec_pretty(&result)?;
    write_output(output, &json).await
}

async fn write_output(output: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), bytes = bytes.len(), "Output written");
        }
        None => println!("{}", String::from_utf8_lossy(bytes)),
    }
    Ok(())
}

/// `key=value`; values are read as JSON when they parse, otherwise as strings.
fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let value = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                if stream.recv().await.is_some() {
                    info!("Received SIGTERM");
                }
            }
            Err(err) => warn!(error = %err, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received termination signal (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received termination signal (SIGTERM)");
        }
    }
}
