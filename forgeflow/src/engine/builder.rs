//! Engine builder.

use super::{Engine, EngineInner};
use crate::analysis::FailureAnalyzer;
use crate::cache::{CacheStore, InMemoryCacheStore};
use crate::cancellation::CancellationRegistry;
use crate::concurrency::ConcurrencyGate;
use crate::config::{EngineConfig, ForgeflowConfig};
use crate::core::Target;
use crate::errors::Result;
use crate::events::{EventBus, EventSink};
use crate::pipeline::{CommandExecutor, PipelineExecutor, ShellCommandExecutor, StepRunner};
use crate::registry::TargetRegistry;
use crate::rollback::RollbackController;
use crate::store::JobStore;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tracing::info;

/// Assembles an [`Engine`] from its collaborators.
///
/// Anything not supplied falls back to a default: the shell command
/// executor, an in-memory cache bounded by the config, no event sinks.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    targets: Vec<Target>,
    commands: Option<Arc<dyn CommandExecutor>>,
    cache: Option<Arc<dyn CacheStore>>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EngineBuilder {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `config` for the engine.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a target.
    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    /// Registers several targets.
    #[must_use]
    pub fn with_targets(mut self, targets: impl IntoIterator<Item = Target>) -> Self {
        self.targets.extend(targets);
        self
    }

    /// Runs step commands through `commands`.
    #[must_use]
    pub fn with_command_executor(mut self, commands: Arc<dyn CommandExecutor>) -> Self {
        self.commands = Some(commands);
        self
    }

    /// Uses a custom cache backend.
    #[must_use]
    pub fn with_cache_store(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Adds an event observer.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Validates everything and builds the engine.
    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;
        let registry = TargetRegistry::from_targets(self.targets)?;

        let commands = self
            .commands
            .unwrap_or_else(|| Arc::new(ShellCommandExecutor::new()));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryCacheStore::new(&self.config.cache)));

        let store = Arc::new(JobStore::new());
        let gate = ConcurrencyGate::new(self.config.max_concurrent_jobs);
        let cancellations = Arc::new(CancellationRegistry::new());
        let events = Arc::new(EventBus::new(self.config.event_channel_capacity));
        for sink in self.sinks {
            events.add_sink(sink);
        }

        let executor = Arc::new(PipelineExecutor::new(
            StepRunner::new(commands, self.config.retry.clone()),
            cache.clone(),
            self.config.cache.enabled,
            store.clone(),
        ));
        let rollback = RollbackController::new(
            executor.clone(),
            store.clone(),
            gate.clone(),
            cancellations.clone(),
            events.clone(),
        );
        let targets = registry.list();
        rollback.seed(targets.iter().map(|t| &**t));

        info!(
            targets = registry.len(),
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            admission_mode = ?self.config.admission_mode,
            auto_rollback = self.config.auto_rollback,
            cache_enabled = self.config.cache.enabled,
            "Engine initialised"
        );

        Ok(Engine {
            inner: Arc::new(EngineInner {
                config: self.config,
                registry,
                store,
                cache,
                gate,
                cancellations,
                executor,
                rollback,
                analyzer: FailureAnalyzer::new()?,
                events,
                active: AtomicUsize::new(0),
            }),
        })
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("targets", &self.targets.len())
            .field("custom_executor", &self.commands.is_some())
            .field("custom_cache", &self.cache.is_some())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Engine {
    /// Starts building an engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Builds an engine from a loaded configuration document.
    pub fn from_config(
        config: ForgeflowConfig,
        commands: Arc<dyn CommandExecutor>,
    ) -> Result<Self> {
        EngineBuilder::new()
            .with_config(config.engine)
            .with_targets(config.targets)
            .with_command_executor(commands)
            .build()
    }
}
