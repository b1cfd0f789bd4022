//! CLI binary for edgequake-webclip.
//!
//! A thin shim over the library crate: `serve` wires the HTTP capture
//! boundary and both pipeline workers into one process, `convert` runs the
//! HTML-to-Markdown converter offline.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_webclip::store::{
    FsPayloadStore, HttpFetcher, MemoryQueue, NotionConfig, NotionDocumentStore, PageFetcher,
    QueueSettings,
};
use edgequake_webclip::{
    html_to_markdown, server, LlmExtractor, Pipeline, PipelineConfig, WebclipError,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the capture endpoint on port 8080
  webclip serve --bind 0.0.0.0:8080

  # Convert a saved page, resolving links against its origin
  webclip convert page.html --base-url https://example.com/post

  # Convert a live page
  webclip convert https://example.com/post -o post.md

ENVIRONMENT VARIABLES:
  NOTION_TOKEN            Notion integration token (serve)
  NOTION_DATABASE_ID      Target Notion database (serve)
  OPENAI_API_KEY          OpenAI API key (main-content extraction)
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
"#;

/// Save web pages from a bookmarklet into a knowledge base.
#[derive(Parser, Debug)]
#[command(
    name = "webclip",
    version,
    about = "Save web pages from a bookmarklet into a knowledge base",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "WEBCLIP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "WEBCLIP_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the capture endpoint and the pipeline workers.
    Serve(ServeArgs),
    /// Convert an HTML file or URL to Markdown.
    Convert(ConvertArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "WEBCLIP_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Directory holding capture payloads.
    #[arg(long, env = "WEBCLIP_PAYLOAD_DIR", default_value = "./webclip-payloads")]
    payload_dir: PathBuf,

    #[arg(long, env = "NOTION_TOKEN", hide_env_values = true)]
    notion_token: String,

    #[arg(long, env = "NOTION_DATABASE_ID")]
    notion_database_id: String,

    /// LLM model ID used for main-content extraction.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Publish the full converted page without main-content extraction.
    #[arg(long, env = "WEBCLIP_NO_EXTRACT")]
    no_extract: bool,

    /// Extraction call timeout in seconds.
    #[arg(long, env = "WEBCLIP_EXTRACTION_TIMEOUT", default_value_t = 300)]
    extraction_timeout: u64,

    /// Page download timeout in seconds.
    #[arg(long, env = "WEBCLIP_FETCH_TIMEOUT", default_value_t = 30)]
    fetch_timeout: u64,

    /// Seconds during which a repeated capture of the same URL is dropped.
    #[arg(long, env = "WEBCLIP_DEDUP_WINDOW", default_value_t = 300)]
    dedup_window: u64,

    /// Messages processed concurrently by the processing stage.
    #[arg(long, env = "WEBCLIP_PROCESS_CONCURRENCY", default_value_t = 1)]
    process_concurrency: usize,

    /// Messages processed concurrently by the fetch stage.
    #[arg(long, env = "WEBCLIP_FETCH_CONCURRENCY", default_value_t = 8)]
    fetch_concurrency: usize,

    /// Receives before a failing message is dead-lettered.
    #[arg(long, env = "WEBCLIP_MAX_RECEIVE_COUNT", default_value_t = 3)]
    max_receive_count: u32,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Local HTML file or HTTP/HTTPS URL.
    input: String,

    /// Base URL for relative links. Defaults to the input URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Convert(args) => convert(args).await,
    }
}

// ── serve ────────────────────────────────────────────────────────────────────

async fn serve(args: ServeArgs) -> Result<()> {
    let mut builder = PipelineConfig::builder()
        .extract_main_content(!args.no_extract)
        .extraction_timeout_secs(args.extraction_timeout)
        .fetch_timeout_secs(args.fetch_timeout)
        .dedup_window_secs(args.dedup_window)
        .process_concurrency(args.process_concurrency)
        .fetch_concurrency(args.fetch_concurrency)
        .max_receive_count(args.max_receive_count);
    if let Some(model) = args.model {
        builder = builder.model(model);
    }
    if let Some(provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    let config = builder.build().context("invalid configuration")?;

    let payloads = Arc::new(FsPayloadStore::new(&args.payload_dir));
    let queue = Arc::new(MemoryQueue::new(QueueSettings::from(&config)));
    let mut notion = NotionConfig::new(args.notion_token, args.notion_database_id);
    notion.max_blocks_per_append = config.max_blocks_per_append;
    let documents = Arc::new(NotionDocumentStore::new(notion).context("Notion client")?);
    let fetcher = Arc::new(HttpFetcher::new(&config).context("HTTP client")?);

    let extractor = if config.extract_main_content {
        match LlmExtractor::from_config(&config) {
            Ok(extractor) => Some(Arc::new(extractor)),
            Err(e @ WebclipError::ProviderNotConfigured { .. }) => {
                warn!("{e}; main-content extraction disabled");
                None
            }
            Err(e) => return Err(e).context("LLM provider"),
        }
    } else {
        None
    };

    let retention = config.payload_retention();
    let mut pipeline = Pipeline::new(config, payloads.clone(), queue, documents, fetcher);
    if let Some(extractor) = extractor {
        pipeline = pipeline.with_extractor(extractor);
    }

    // Queued messages are lost on exit; payloads are not.
    pipeline
        .recover()
        .await
        .context("re-enqueue unsettled captures")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let workers = {
        let pipeline = pipeline.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { pipeline.run(shutdown).await })
    };
    let purger = tokio::spawn(purge_loop(payloads, retention, shutdown_rx));

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("cannot bind {}", args.bind))?;
    info!(addr = %args.bind, payload_dir = %args.payload_dir.display(), "capture endpoint listening");

    axum::serve(listener, server::router(pipeline.ingress()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("HTTP server")?;

    let _ = shutdown_tx.send(true);
    workers.await.context("worker task")??;
    purger.await.context("purge task")?;
    Ok(())
}

/// Delete expired payloads once an hour until shutdown.
async fn purge_loop(
    payloads: Arc<FsPayloadStore>,
    retention: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
    loop {
        tokio::select! {
            _ = interval.tick() => match payloads.purge_expired(retention).await {
                Ok(0) => {}
                Ok(n) => info!(removed = n, "expired payloads purged"),
                Err(e) => warn!("payload purge failed: {e}"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

// ── convert ──────────────────────────────────────────────────────────────────

async fn convert(args: ConvertArgs) -> Result<()> {
    let is_url = args.input.starts_with("http://") || args.input.starts_with("https://");

    let html = if is_url {
        let fetcher = HttpFetcher::new(&PipelineConfig::default())?;
        fetcher
            .fetch(&args.input)
            .await
            .with_context(|| format!("cannot download {}", args.input))?
    } else {
        tokio::fs::read_to_string(&args.input)
            .await
            .with_context(|| format!("cannot read {}", args.input))?
    };

    let base_url = match (args.base_url, is_url) {
        (Some(base), _) => base,
        (None, true) => args.input.clone(),
        (None, false) => String::new(),
    };
    if !base_url.is_empty() && url::Url::parse(&base_url).is_err() {
        bail!("--base-url must be an absolute URL, got '{base_url}'");
    }

    let markdown = html_to_markdown(&html, &base_url);

    match args.output {
        Some(path) => {
            tokio::fs::write(&path, format!("{markdown}\n"))
                .await
                .with_context(|| format!("cannot write {}", path.display()))?;
            info!(path = %path.display(), bytes = markdown.len(), "markdown written");
        }
        None => println!("{markdown}"),
    }
    Ok(())
}
