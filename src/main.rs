//! Command line entry point for the probe suites.

use clap::{Parser, ValueEnum};
use replica_probe::{
    DurabilityConfig, Error, ExperimentOrchestrator, ProbeConfig, ReplicationConfig,
    SimulatedFaults, SimulatedStore, SimulatedStoreConfig, StoreHandle,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "replica_probe=info,info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// In-process replica set
    Simulated,
    /// MongoDB replica set (requires the `mongo` feature)
    Mongo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FaultPreset {
    None,
    Light,
    Moderate,
    Heavy,
}

impl FaultPreset {
    fn faults(self) -> SimulatedFaults {
        match self {
            FaultPreset::None => SimulatedFaults::none(),
            FaultPreset::Light => SimulatedFaults::light(),
            FaultPreset::Moderate => SimulatedFaults::moderate(),
            FaultPreset::Heavy => SimulatedFaults::heavy(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    version,
    about = "Probe consistency, durability and failover behaviour of a replicated store",
    long_about = None
)]
struct Cli {
    /// Suite to run: write-concern | replication | consistency
    #[arg(long, env = "SERVICE")]
    service: Option<String>,

    #[arg(long, value_enum, env = "PROBE_BACKEND", default_value = "simulated")]
    backend: Backend,

    /// Connection string for the mongo backend
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017/?replicaSet=rs0")]
    uri: String,

    #[arg(long, env = "PROBE_DATABASE", default_value = "lab")]
    database: String,

    /// Measured batches per durability level
    #[arg(long)]
    trials: Option<u32>,

    /// Records per measured batch
    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    warmup_rounds: Option<u32>,

    /// Records written by the propagation check
    #[arg(long)]
    propagation_count: Option<u32>,

    /// Members of the simulated replica set
    #[arg(long, default_value_t = 3)]
    sim_members: usize,

    #[arg(long, value_enum, default_value = "light")]
    sim_faults: FaultPreset,

    /// Fixed replication lag for the simulated set, overriding the preset
    #[arg(long)]
    sim_lag_ms: Option<u64>,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

impl Cli {
    fn probe_config(&self) -> ProbeConfig {
        let mut durability = DurabilityConfig::default();
        if let Some(trials) = self.trials {
            durability = durability.with_trials(trials);
        }
        if let Some(size) = self.batch_size {
            durability = durability.with_batch_size(size);
        }
        if let Some(rounds) = self.warmup_rounds {
            durability = durability.with_warmup_rounds(rounds);
        }

        let mut replication = ReplicationConfig::default();
        if let Some(count) = self.propagation_count {
            replication = replication.with_propagation_count(count);
        }

        ProbeConfig::new()
            .with_durability_config(durability)
            .with_replication_config(replication)
    }

    fn simulated_store(&self) -> SimulatedStore {
        let mut faults = self.sim_faults.faults();
        if let Some(lag) = self.sim_lag_ms {
            faults = faults.with_replication_lag(Duration::from_millis(lag));
        }
        SimulatedStore::new(
            SimulatedStoreConfig::default()
                .with_members(self.sim_members)
                .with_faults(faults),
        )
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

async fn connect(cli: &Cli) -> Result<Arc<dyn StoreHandle>, Error> {
    match cli.backend {
        Backend::Simulated => {
            info!(members = cli.sim_members, faults = ?cli.sim_faults, "using simulated replica set");
            Ok(Arc::new(cli.simulated_store()))
        }
        #[cfg(feature = "mongo")]
        Backend::Mongo => {
            let store = replica_probe::store::MongoStore::connect(&cli.uri, &cli.database).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "mongo"))]
        Backend::Mongo => Err(Error::Config(
            "mongo backend requested but this build lacks the `mongo` feature".to_string(),
        )),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let store = match connect(&cli).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "cannot open store");
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = match ExperimentOrchestrator::new(store, cli.probe_config()) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    match orchestrator.run(cli.service.as_deref()).await {
        Ok(Some(report)) => {
            info!(
                suite = %report.suite(),
                violations = report.violation_count(),
                "finished"
            );
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "suite aborted");
            ExitCode::FAILURE
        }
    }
}
