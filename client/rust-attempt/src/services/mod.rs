use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::models::AttemptContext;
use crate::utils::clock::{Clock, SystemClock};

use api_client::{AssignmentApi, HttpAssignmentApi};
use attempt_runner::{AttemptHandle, AttemptRunner};
use attempt_session::AttemptSession;
use attempt_store::AttemptStore;

pub mod api_client;
pub mod attempt_runner;
pub mod attempt_session;
pub mod attempt_state;
pub mod attempt_store;
pub mod countdown;
pub mod navigation;
pub mod submission;

/// Shared collaborators for every attempt started by this process.
pub struct AppState {
    pub config: Config,
    pub api: Arc<dyn AssignmentApi>,
    pub store: Arc<dyn AttemptStore>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        let api: Arc<dyn AssignmentApi> = Arc::new(HttpAssignmentApi::from_config(&config)?);
        let store = attempt_store::build_store(&config.storage).await?;

        tracing::info!("Attempt client configured for {}", config.api_base_url);

        Ok(Self {
            config,
            api,
            store,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_parts(
        config: Config,
        api: Arc<dyn AssignmentApi>,
        store: Arc<dyn AttemptStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            api,
            store,
            clock,
        }
    }

    /// Fetches the assignment, resumes or starts the attempt and hands it to
    /// a runner ticking at the configured interval.
    pub async fn launch(&self, assignment_id: &str) -> Result<AttemptHandle> {
        let context = api_client::prepare_attempt(self.api.as_ref(), assignment_id).await?;
        self.launch_with(context).await
    }

    /// Same as `launch` for callers that already hold the assignment.
    pub async fn launch_with(&self, context: AttemptContext) -> Result<AttemptHandle> {
        let session = AttemptSession::start(
            context,
            self.store.clone(),
            self.clock.clone(),
            &self.config.timer,
        )
        .await?;

        Ok(AttemptRunner::spawn(
            session,
            self.api.clone(),
            self.config.timer.tick_interval(),
        ))
    }
}
