pub mod run;
pub mod set;
pub mod show;

use anyhow::{Context, Result};
use async_channel::Receiver;
use service_host::{
    ChannelHooks, HostConfig, HostController, HostSignal, LogAggregator, ProcessRegistry,
    ServiceOrchestrator, SledStore,
};
use smol::Task;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const CONFIG_FILE: &str = "config.yaml";
const PREFERENCES_DIR: &str = "preferences";

/// Where the host keeps its state
pub struct HostPaths {
    pub data_dir: PathBuf,
    pub config: Option<PathBuf>,
}

impl HostPaths {
    /// Apply defaults: `<local data dir>/npc-host`, and `config.yaml` inside it if present
    pub fn resolve(data_dir: Option<PathBuf>, config: Option<PathBuf>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("npc-host"),
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = config.or_else(|| {
            let candidate = data_dir.join(CONFIG_FILE);
            candidate.exists().then_some(candidate)
        });

        Ok(Self { data_dir, config })
    }

    pub fn preferences(&self) -> PathBuf {
        self.data_dir.join(PREFERENCES_DIR)
    }
}

/// Load the configuration; the working directory defaults to the data directory
pub fn load_config(paths: &HostPaths) -> Result<HostConfig> {
    let mut config = match &paths.config {
        Some(path) => HostConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => HostConfig::default(),
    };
    if config.working_dir.is_none() {
        config.working_dir = Some(paths.data_dir.clone());
    }
    Ok(config)
}

pub async fn open_store(paths: &HostPaths) -> Result<SledStore> {
    let path = paths.preferences();
    SledStore::open(&path)
        .await
        .with_context(|| format!("Failed to open preferences at {}", path.display()))
}

/// A fully wired host
pub struct Host {
    pub controller: HostController,
    pub orchestrator: Arc<ServiceOrchestrator>,
    pub log: LogAggregator,
    pub signals: Receiver<HostSignal>,
    _drain: Task<()>,
    _exits: Task<()>,
}

impl Host {
    pub async fn open(paths: &HostPaths) -> Result<Self> {
        let config = load_config(paths)?;
        let store = open_store(paths).await?;
        info!(
            executable = %config.binary_location().executable_path().display(),
            data_dir = %paths.data_dir.display(),
            "Host configured"
        );
        Ok(Self::with_store(&config, Arc::new(store)))
    }

    pub fn with_store(config: &HostConfig, store: Arc<SledStore>) -> Self {
        let log = LogAggregator::new(config.log_capacity);
        let (sink, drain) = log.attach(config.log_channel_capacity, config.log_overflow);
        let registry = ProcessRegistry::new(config.resolver(), sink, config.stop_policy());
        let (hooks, signals) = ChannelHooks::new();
        let orchestrator = Arc::new(ServiceOrchestrator::new(registry, log.clone(), Arc::new(hooks)));
        let exits = orchestrator.spawn_exit_supervisor();
        let controller = HostController::new(orchestrator.clone(), store);

        Self {
            controller,
            orchestrator,
            log,
            signals,
            _drain: drain,
            _exits: exits,
        }
    }
}

/// Display helper for an argv
pub fn shell_words(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                format!("'{arg}'")
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
