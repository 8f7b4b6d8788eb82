//! Pipeline assembly
//!
//! Wires the state actor, gateway, queue, executor, completion handler,
//! dispatcher and scheduler together from one [`Config`].

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use eyre::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::completion::CompletionHandler;
use crate::config::Config;
use crate::dispatcher::RoundDispatcher;
use crate::events::{EventBus, create_event_bus};
use crate::executor::RoundExecutor;
use crate::gateway::GenerationGateway;
use crate::jobs::JobRunner;
use crate::llm::{LlmClient, create_client};
use crate::prompts::PromptLoader;
use crate::queue::ChannelQueue;
use crate::scheduler::SessionScheduler;
use crate::state::StateManager;
use crate::worker::WorkerPool;

pub struct Pipeline {
    pub config: Config,
    pub state: StateManager,
    pub events: Arc<EventBus>,
    pub queue: ChannelQueue,
    pub completion: Arc<CompletionHandler>,
    pub executor: Arc<RoundExecutor>,
    pub dispatcher: Arc<RoundDispatcher>,
    pub scheduler: Arc<SessionScheduler>,
}

impl Pipeline {
    /// Build every component over an existing state actor and client
    pub fn build(config: Config, state: StateManager, client: Arc<dyn LlmClient>) -> Self {
        debug!("Pipeline::build: called");
        let events = create_event_bus();
        let queue = ChannelQueue::new(config.executor.queue_capacity);
        let gateway = Arc::new(GenerationGateway::new(client, &config.gateway));
        let prompts = Arc::new(PromptLoader::new(config.prompts_dir.as_deref()));

        let completion = Arc::new(CompletionHandler::new(
            state.clone(),
            gateway.clone(),
            prompts.clone(),
            events.clone(),
            &config.compression,
            config.completion.clone(),
        ));
        let executor = Arc::new(RoundExecutor::new(
            state.clone(),
            gateway,
            prompts,
            Arc::new(queue.clone()),
            completion.clone(),
            events.clone(),
            &config.compression,
            config.executor.clone(),
        ));
        let dispatcher = Arc::new(RoundDispatcher::new(
            state.clone(),
            Arc::new(queue.clone()),
            completion.clone(),
            events.clone(),
            config.dispatcher.clone(),
        ));
        let scheduler = Arc::new(SessionScheduler::new(
            state.clone(),
            config.scheduler.clone(),
            events.clone(),
        ));

        Self {
            config,
            state,
            events,
            queue,
            completion,
            executor,
            dispatcher,
            scheduler,
        }
    }

    /// Validate the config, open the store and create the provider client
    pub fn open(config: Config) -> Result<Self> {
        debug!("Pipeline::open: called");
        config.validate()?;
        let state = open_state(&config)?;
        let client = create_client(&config.llm).context("Failed to create LLM client")?;
        Ok(Self::build(config, state, client))
    }

    /// Run workers, the scheduler and the dispatcher until `signal` resolves
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        debug!("run_until: called");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let pool = WorkerPool::spawn(
            self.config.executor.workers,
            Arc::new(self.queue.clone()),
            self.executor.clone(),
            self.config.executor.max_deliveries,
            shutdown_rx.clone(),
        );
        let dispatcher =
            JobRunner::new(self.dispatcher.clone(), self.config.dispatcher.interval()).spawn(shutdown_rx.clone());
        let scheduler = JobRunner::new(self.scheduler.clone(), self.config.scheduler.interval()).spawn(shutdown_rx);
        info!(workers = pool.len(), "Pipeline running");

        signal.await;
        info!("Pipeline shutting down");
        if shutdown_tx.send(true).is_err() {
            warn!("All pipeline tasks already stopped");
        }

        for handle in [scheduler, dispatcher] {
            if let Err(e) = handle.await {
                warn!(error = %e, "Job runner task failed");
            }
        }
        pool.join().await;
        self.queue.close().await;

        // Items still queued are lost; their rounds stall and are resumed
        // by the dispatcher on the next start
        let stats = self.queue.stats();
        info!(?stats, "Queue closed");

        self.state.shutdown().await?;
        Ok(())
    }
}

/// Spawn the state actor over the configured store directory
pub fn open_state(config: &Config) -> Result<StateManager> {
    let store_dir = PathBuf::from(&config.storage.store_dir);
    std::fs::create_dir_all(&store_dir).context(format!("Failed to create store dir {}", store_dir.display()))?;
    StateManager::spawn(&store_dir).context("Failed to open store")
}
