use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use logger::{LevelFilter, LogFormat};
use probewatch::clock::{Clock, SystemClock};
use probewatch::database::initialize_database;
use probewatch::pool::open_pool;
use probewatch::{
    CertificateProbe, CycleReport, DnsProbe, ProbeFamily, ProbeRunner, RunGuard, SqlLockStore, SqlResultStore,
    import, targets,
};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

mod config;

use config::Config;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (defaults to $XDG_CONFIG_HOME/probewatch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Trigger probe cycles on every scheduler tick until interrupted
    Run,
    /// Run a single cycle for one probe family
    Once {
        /// `certificate` or `dns`
        family: ProbeFamily,
    },
    /// Register targets from a domain list and an optional resolver list
    Seed {
        domains: PathBuf,
        #[arg(short, long)]
        resolvers: Option<PathBuf>,
    },
    /// Import ssl_check.json / dns_check.json reports
    Import {
        #[arg(long)]
        certificates: Option<PathBuf>,
        #[arg(long)]
        dns: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config,
}

/// Everything a command needs, wired against one database
struct Service {
    config: Config,
    store: Arc<SqlResultStore>,
    runner: Arc<ProbeRunner>,
}

impl Service {
    async fn open(config: Config) -> Result<Self> {
        let pool = open_pool(&config.database.path)
            .await
            .with_context(|| format!("opening database {}", config.database.path.display()))?;
        {
            let conn = pool.get().await?;
            initialize_database(&conn).await?;
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(SqlResultStore::new(pool.clone(), clock.clone()));
        let guard = RunGuard::new(Arc::new(SqlLockStore::new(pool, clock.clone())));
        let certificates = Arc::new(CertificateProbe::new(clock).context("building TLS client")?);

        let runner = ProbeRunner::new(
            guard,
            store.clone(),
            certificates,
            Arc::new(DnsProbe::new()),
            config.runner_settings(),
        );

        Ok(Self { config, store, runner: Arc::new(runner) })
    }

    async fn run_once(&self, family: ProbeFamily) -> Result<()> {
        match self.runner.run_cycle(family).await? {
            CycleReport::Skipped => info!(%family, "Another runner holds the lock, nothing to do"),
            CycleReport::Completed(summary) => println!(
                "{family}: checked {}, succeeded {}, failed {}, write errors {}",
                summary.checked, summary.succeeded, summary.failed, summary.write_errors
            ),
        }
        Ok(())
    }

    /// Tick loop: each tick asks every enabled family whether it should run
    /// and spawns the cycles that should. Families run independently.
    async fn run(&self) -> Result<()> {
        let mut tick = tokio::time::interval(self.config.tick());
        let mut cycles = JoinSet::new();
        info!(tick = ?self.config.tick(), "Scheduler started");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for family in ProbeFamily::ALL {
                        if !self.runner.should_run(family, self.config.family_enabled(family)).await {
                            continue;
                        }
                        let runner = self.runner.clone();
                        cycles.spawn(async move {
                            if let Err(e) = runner.run_cycle(family).await {
                                error!(%family, error = %format!("{e:#}"), "Cycle failed");
                            }
                        });
                    }
                }
                Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Cycle task panicked");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested, waiting for running cycles");
                    break;
                }
            }
        }

        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Cycle task panicked");
            }
        }
        Ok(())
    }

    async fn seed(&self, domains: &Path, resolvers: Option<&Path>) -> Result<()> {
        let summary = targets::seed_from_files(
            self.store.as_ref(),
            domains,
            resolvers,
            self.config.certificates.default_port,
        )
        .await?;
        println!(
            "registered {} certificate target(s) and {} DNS target(s)",
            summary.certificate_targets, summary.dns_targets
        );
        Ok(())
    }

    async fn import(&self, certificates: Option<&Path>, dns: Option<&Path>) -> Result<()> {
        if certificates.is_none() && dns.is_none() {
            return Err(anyhow!("nothing to import: pass --certificates and/or --dns"));
        }

        if let Some(path) = certificates {
            let contents = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let summary = import::import_certificates(
                self.store.as_ref(),
                &contents,
                self.config.certificates.default_port,
            )
            .await?;
            println!(
                "certificates: imported {}, failed {}, write errors {}",
                summary.imported, summary.failed, summary.write_errors
            );
        }

        if let Some(path) = dns {
            let contents = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let summary = import::import_dns(self.store.as_ref(), &contents).await?;
            println!(
                "dns: imported {}, failed {}, write errors {}",
                summary.imported, summary.failed, summary.write_errors
            );
        }
        Ok(())
    }
}

/// Format and level from `[logging]`, with one warning per rejected value
fn logging_settings(config: &Config) -> (Option<LogFormat>, LevelFilter, Vec<String>) {
    let mut warnings = Vec::new();

    let format = match config.logging.format.parse::<LogFormat>() {
        Ok(format) => Some(format),
        Err(e) => {
            warnings.push(format!("Ignoring [logging] format: {e}"));
            None
        }
    };
    let level = match config.logging.level.parse::<LevelFilter>() {
        Ok(level) => level,
        Err(e) => {
            warnings.push(format!("Ignoring [logging] level '{}', using info: {e}", config.logging.level));
            LevelFilter::INFO
        }
    };

    (format, level, warnings)
}

fn init_logging(config: &Config) {
    let (format, level, warnings) = logging_settings(config);
    logger::init_tracing_with(format, level);

    for warning in warnings {
        warn!("{warning}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref())?;

    if let Command::Config = cli.command {
        print!("{config}");
        return Ok(());
    }

    init_logging(&config);
    let service = Service::open(config).await?;

    match &cli.command {
        Command::Run => service.run().await,
        Command::Once { family } => service.run_once(*family).await,
        Command::Seed { domains, resolvers } => service.seed(domains, resolvers.as_deref()).await,
        Command::Import { certificates, dns } => service.import(certificates.as_deref(), dns.as_deref()).await,
        Command::Config => Ok(()),
    }
}
