use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use reslide::config::{
    init_default_config, load_config, resolve_backend, resolve_config_path, AppConfig,
};
use reslide::job::{FsFileStore, JobOptions, MemoryJobStore};
use reslide::pptx::verify_pptx_roundtrip;
use reslide::translate::backend::HttpBackend;
use reslide::translate::prompts::PromptSet;
use reslide::translate::{GatewayConfig, TranslationGateway};
use reslide::worker::{translate_pptx_bytes, Worker, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "reslide")]
#[command(about = "PPTX translator (LLM backend) with layout re-fitting", long_about = None)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input .pptx (drag-and-drop supported)
    #[arg(value_name = "PPTX")]
    input: Option<PathBuf>,

    /// Output .pptx (default: <input_stem>_translated.pptx)
    #[arg(short, long, value_name = "PPTX")]
    output: Option<PathBuf>,

    /// Source language code (e.g. ja, en)
    #[arg(long, default_value = "ja")]
    source_lang: String,

    /// Target language code (e.g. en, zh)
    #[arg(long, default_value = "en")]
    target_lang: String,

    /// Config file path (default: search for reslide.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model name override for the chat-completions backend
    #[arg(long)]
    model: Option<String>,

    /// Only parse + re-serialize slides and byte-compare (no translation)
    #[arg(long)]
    roundtrip_only: bool,

    /// Run as a polling batch worker over the storage root (no input file)
    #[arg(long)]
    worker: bool,
}

struct Runtime {
    gateway: TranslationGateway,
    worker_cfg: WorkerConfig,
    storage_root: PathBuf,
}

fn config_workdir(input: Option<&Path>) -> PathBuf {
    input
        .and_then(|p| p.parent())
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn build_runtime(args: &Args, workdir: &Path) -> anyhow::Result<Runtime> {
    let cfg_path = resolve_config_path(args.config.clone(), workdir);
    let cfg = match cfg_path.as_deref() {
        Some(p) => load_config(p).with_context(|| format!("load config {}", p.display()))?,
        None => AppConfig::default(),
    };
    let prompts = PromptSet::load(cfg_path.as_deref(), &cfg).context("load prompts")?;
    let backend_cfg = resolve_backend(&cfg, args.model.as_deref()).context("resolve backend")?;
    let backend = HttpBackend::new(&backend_cfg)?;
    tracing::info!(model = %backend_cfg.model, base_url = %backend_cfg.base_url, "backend ready");

    Ok(Runtime {
        gateway: TranslationGateway::new(
            Arc::new(backend),
            prompts.translate,
            GatewayConfig::from_worker(&cfg.worker),
        ),
        worker_cfg: WorkerConfig::from_section(&cfg.worker),
        storage_root: cfg
            .storage
            .root
            .clone()
            .unwrap_or_else(|| PathBuf::from("storage")),
    })
}

async fn run_worker(args: &Args) -> anyhow::Result<()> {
    let Runtime {
        gateway,
        worker_cfg,
        storage_root,
    } = build_runtime(args, &config_workdir(None))?;
    tracing::info!(root = %storage_root.display(), "worker storage root");

    let files = Arc::new(FsFileStore::new(storage_root));
    let worker = Worker::new(MemoryJobStore::shared(), files, gateway, worker_cfg);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });
    worker.run(shutdown_rx).await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    if args.worker {
        return run_worker(&args).await;
    }

    let input = match args.input.clone() {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  reslide <input.pptx>\n\nTIPS:\n  - Drag a .pptx file onto reslide to translate it (output lands next to it).\n  - Default config search: reslide.toml (upwards), or set RESLIDE_CONFIG.\n  - reslide --worker polls the storage root for submitted batch jobs.\n"
            );
            return Ok(());
        }
    };

    let bytes = std::fs::read(&input).with_context(|| format!("read {}", input.display()))?;

    if args.roundtrip_only {
        let slides = verify_pptx_roundtrip(&bytes)?;
        eprintln!("Round-trip OK: {slides} slide part(s) byte-identical");
        return Ok(());
    }

    let output = match args.output.clone() {
        Some(p) => p,
        None => {
            let stem = input
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("output")
                .to_string();
            input.with_file_name(format!("{stem}_translated.pptx"))
        }
    };

    let runtime = build_runtime(&args, &config_workdir(Some(&input)))?;
    let mut options = JobOptions::new(&args.source_lang, &args.target_lang);
    options.model = args.model.clone();

    let deck = translate_pptx_bytes(&runtime.gateway, &bytes, &options)
        .await
        .context("translate deck")?;
    std::fs::write(&output, &deck.bytes)
        .with_context(|| format!("write {}", output.display()))?;
    if !deck.failed_fragments.is_empty() {
        eprintln!(
            "Warning: {} fragment(s) kept their source text (translation failed)",
            deck.failed_fragments.len()
        );
    }
    eprintln!("Wrote: {}", output.display());
    Ok(())
}
