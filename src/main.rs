use anyhow::Context;
use benchpipe::{
    advance, run_pipeline, stage_status, FileReporter, LogReporter, PipelineConfig, Stage,
    StatusReporter,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "benchpipe")]
#[command(about = "Validate, unpack and publish uploaded benchmark result archives", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    roots: RootArgs,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct RootArgs {
    /// JSON configuration file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Per-host archives and stage directories
    #[arg(long, global = true)]
    archive_root: Option<PathBuf>,

    /// Unpacked result trees
    #[arg(long, global = true)]
    incoming_root: Option<PathBuf>,

    /// Published results tree
    #[arg(long, global = true)]
    results_root: Option<PathBuf>,

    /// Published per-user tree
    #[arg(long, global = true)]
    users_root: Option<PathBuf>,

    /// Directory receiving run summaries (logged only when unset)
    #[arg(long, global = true)]
    report_dir: Option<PathBuf>,

    /// Number of parallel workers
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Do not verify archive checksums
    #[arg(long, global = true)]
    skip_verify: bool,

    /// Name tagging the run summary
    #[arg(long, global = true)]
    run_name: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Unpack and publish every queued archive
    Unpack,
    /// Show how many entries wait at each stage
    Status,
    /// Move one entry a single stage forward
    Advance {
        /// Source host of the entry
        #[arg(long)]
        host: String,
        /// Archive file name, e.g. run-007.tar.gz
        #[arg(long)]
        archive: String,
        /// Stage the entry is currently at
        #[arg(long, value_enum)]
        from: Stage,
    },
}

impl RootArgs {
    fn into_config(self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(path) = self.archive_root {
            config.archive_root = path;
        }
        if let Some(path) = self.incoming_root {
            config.incoming_root = path;
        }
        if let Some(path) = self.results_root {
            config.results_root = path;
        }
        if let Some(path) = self.users_root {
            config.users_root = path;
        }
        if let Some(path) = self.report_dir {
            config.report_dir = Some(path);
        }
        if let Some(workers) = self.workers {
            config.max_workers = workers;
        }
        if let Some(run_name) = self.run_name {
            config.run_name = run_name;
        }
        config.skip_verify |= self.skip_verify;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("benchpipe={}", log_level))
        .init();

    let config = cli.roots.into_config()?;

    match cli.command {
        Command::Unpack => {
            info!("Archive root: {:?}", config.archive_root);
            info!("Workers: {}", config.max_workers);

            let reporter: Box<dyn StatusReporter> = match &config.report_dir {
                Some(dir) => Box::new(FileReporter::new(dir)),
                None => Box::new(LogReporter),
            };
            let report = run_pipeline(&config, reporter.as_ref())
                .await
                .context("Pipeline run aborted")?;
            info!(
                "Run complete: {} unpacked, {} errors",
                report.processed, report.errors
            );
        }
        Command::Status => {
            println!(
                "{:<12} {:>8} {:>14} {:>7} {:>11} {:>11}",
                "STAGE", "PENDING", "BYTES", "BROKEN", "DUPLICATES", "UNREADABLE"
            );
            for status in stage_status(&config)? {
                println!(
                    "{:<12} {:>8} {:>14} {:>7} {:>11} {:>11}",
                    status.stage.to_string(),
                    status.pending,
                    status.pending_bytes,
                    status.broken,
                    status.duplicates,
                    status.unreadable
                );
            }
        }
        Command::Advance {
            host,
            archive,
            from,
        } => {
            let moved = advance(&config, &host, &archive, from)?;
            println!("{}", moved.display());
        }
    }

    Ok(())
}
