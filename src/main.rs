use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use tickflow::analytics::{analyze, AnalyticsOptions};
use tickflow::config::{Config, LoggingConfig, DEFAULT_CONFIG_PATH};
use tickflow::generator::{RandomTickGenerator, ReplayGenerator, TickGenerator};
use tickflow::pipeline::{run_ingest, PipelineSettings};
use tickflow::store::{AnyConnector, StoreConnector, TickStore};

const USAGE: &str = "\
usage: tickflow <command> [options]

commands:
  ingest [--iterations N]        generate synthetic ticks and persist them
  replay <file.jsonl>            persist ticks from a JSON-lines file
  analyze [--symbols A,B]
          [--scaling none|min-max|z-score]
          [--model none|clustering|regression]
                                 print analytics over the stored ticks as JSON
  help                           show this message

environment:
  TICKFLOW_CONFIG                config path (default config/default.toml)
  RUST_LOG                       overrides logging.level";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(
        args.first().map(String::as_str),
        None | Some("help" | "--help" | "-h")
    ) {
        println!("{}", USAGE);
        return Ok(());
    }

    let config_path = std::env::var("TICKFLOW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = match Config::load_from_path(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&config.logging)?;
    tracing::info!(
        config = %config_path.display(),
        backend = ?config.store.backend,
        "Starting tickflow"
    );

    match args[0].as_str() {
        "ingest" => {
            let mut generator_cfg = config.generator.clone();
            if let Some(n) = flag_value(&args, "--iterations") {
                generator_cfg.iterations =
                    Some(n.parse().with_context(|| format!("invalid --iterations '{}'", n))?);
            }
            let generator = RandomTickGenerator::from_config(&generator_cfg);
            let settings = PipelineSettings::from_config(&generator_cfg, &config.writer);
            ingest(generator, &config, settings).await
        }
        "replay" => {
            let path = args
                .get(1)
                .ok_or_else(|| anyhow!("`replay` requires a file argument"))?;
            let file = File::open(path).with_context(|| format!("failed to open {}", path))?;
            let generator = ReplayGenerator::new(BufReader::new(file));
            let mut settings = PipelineSettings::from_config(&config.generator, &config.writer);
            settings.interval = std::time::Duration::from_millis(1);
            settings.iterations = None;
            ingest(generator, &config, settings).await
        }
        "analyze" => {
            let options = analytics_options(&args, &config)?;
            let connector = AnyConnector::from_config(&config.store);
            let report = tokio::task::spawn_blocking(move || -> Result<_> {
                let mut store = connector
                    .connect()
                    .with_context(|| format!("failed to connect to {}", connector.describe()))?;
                let ticks = store.query_all(options.symbols.as_ref())?;
                Ok(analyze(&ticks, &options))
            })
            .await
            .context("analytics task failed")??;
            tracing::info!(rows = report.rows.len(), status = %report.summary, "Analytics ready");
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        other => bail!(
            "unknown command `{}`. expected one of: ingest|replay|analyze|help",
            other
        ),
    }
}

async fn ingest<G: TickGenerator>(
    generator: G,
    config: &Config,
    settings: PipelineSettings,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctrl_c_shutdown = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Ctrl+C received");
        let _ = ctrl_c_shutdown.send(true);
    });

    let connector = AnyConnector::from_config(&config.store);
    let summary = run_ingest(generator, connector, settings, shutdown_rx).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn analytics_options(args: &[String], config: &Config) -> Result<AnalyticsOptions> {
    let mut options = config.analytics.to_options();
    if let Some(list) = flag_value(args, "--symbols") {
        let symbols: BTreeSet<String> = list
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        options.symbols = Some(symbols);
    }
    if let Some(s) = flag_value(args, "--scaling") {
        options.scaling = s.parse().map_err(|e: String| anyhow!(e))?;
    }
    if let Some(m) = flag_value(args, "--model") {
        options.model = m.parse().map_err(|e: String| anyhow!(e))?;
    }
    Ok(options)
}

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn init_tracing(cfg: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (&cfg.file, cfg.json) {
        (Some(path), json) => {
            let log_file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            let builder = builder.with_writer(log_file).with_ansi(false);
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
        (None, true) => builder.with_writer(std::io::stderr).json().init(),
        (None, false) => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}
