//! Pipeline orchestrator
//!
//! A linear state machine over the five stages with a short-circuit edge to
//! `Done` on error:
//!
//! ```text
//! Research ──▶ Draft ──▶ FactCheck ──▶ Citation ──▶ Improve ──▶ Done
//!     │          │           │            │
//!     └──────────┴───────────┴────────────┴──── error ─────────▶ Done
//! ```
//!
//! The optional whole-run timeout never exposes a half-written state: before
//! each stage the orchestrator publishes a checkpoint on a `watch` channel, and
//! on expiry the result is built from the last checkpoint.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ConfigError, PipelineError, StageError};
use crate::generation::{Generator, RigGenerator};
use crate::result::RunResult;
use crate::search::{SearchClient, TavilyClient};
use crate::stages::{default_stages, run_stage, Stage, StageContext};
use crate::state::{ResearchState, RunStatus, SearchDepth, StageKind};

/// Position in the pipeline state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineNode {
    Stage(StageKind),
    Done,
}

impl PipelineNode {
    pub const START: PipelineNode = PipelineNode::Stage(StageKind::Research);

    /// Transition after a stage has run and left the state with `status`.
    pub fn next(self, status: RunStatus) -> PipelineNode {
        match self {
            PipelineNode::Done => PipelineNode::Done,
            PipelineNode::Stage(_) if status == RunStatus::Error => PipelineNode::Done,
            PipelineNode::Stage(kind) => kind
                .successor()
                .map(PipelineNode::Stage)
                .unwrap_or(PipelineNode::Done),
        }
    }
}

/// Input of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub topic: String,
    pub search_depth: SearchDepth,
    pub num_queries: usize,
}

impl RunRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            search_depth: SearchDepth::Basic,
            num_queries: 3,
        }
    }

    pub fn with_depth(mut self, depth: SearchDepth) -> Self {
        self.search_depth = depth;
        self
    }

    pub fn with_queries(mut self, num_queries: usize) -> Self {
        self.num_queries = num_queries;
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.topic.trim().is_empty() {
            return Err(PipelineError::InvalidInput("topic cannot be empty".to_string()));
        }
        if self.num_queries == 0 {
            return Err(PipelineError::InvalidInput(
                "num_queries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// State published at every stage boundary
#[derive(Debug, Clone)]
struct Checkpoint {
    node: PipelineNode,
    state: ResearchState,
}

/// The research pipeline: stages, their shared context and the run loop.
pub struct Pipeline {
    stages: BTreeMap<StageKind, Arc<dyn Stage>>,
    config: Arc<Config>,
}

impl Pipeline {
    /// Build a pipeline over the given collaborators.
    pub fn new(
        generator: Arc<dyn Generator>,
        search: Arc<dyn SearchClient>,
        config: Config,
    ) -> Self {
        let config = Arc::new(config);
        let ctx = Arc::new(StageContext::new(generator, search, Arc::clone(&config)));

        let stages = default_stages(ctx)
            .into_iter()
            .map(|stage| (stage.kind(), stage))
            .collect();

        Self { stages, config }
    }

    /// Build the production pipeline: Rig generation plus Tavily search.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        config.require_credentials()?;

        let api_key = config
            .tavily_api_key
            .clone()
            .ok_or(ConfigError::MissingVar("TAVILY_API_KEY"))?;

        let generator = Arc::new(RigGenerator::from_config(&config));
        let search = Arc::new(TavilyClient::new(api_key).with_timeout(config.tavily_timeout));

        Ok(Self::new(generator, search, config))
    }

    /// Replace the stage registered for `stage.kind()`.
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.insert(stage.kind(), stage);
        self
    }

    /// Run the pipeline to completion. Never fails: every error ends up in
    /// the returned result's `status` and `error`.
    pub async fn run(&self, request: RunRequest) -> RunResult {
        let mut state =
            ResearchState::new(request.topic.trim(), request.search_depth, request.num_queries);

        if let Err(err) = request.validate() {
            warn!(error = %err, "Rejected run request");
            state.fail(err.to_string());
            return RunResult::extract(&state);
        }

        info!(
            topic = %state.topic,
            depth = %state.search_depth,
            num_queries = state.num_queries,
            "Starting research pipeline"
        );

        let started = Instant::now();
        let (checkpoints, _) = watch::channel(Checkpoint {
            node: PipelineNode::START,
            state: state.clone(),
        });

        let terminal = match self.config.run_timeout {
            None => self.drive(state, &checkpoints).await,
            Some(limit) => match timeout(limit, self.drive(state, &checkpoints)).await {
                Ok(terminal) => terminal,
                Err(_) => Self::timed_out(&checkpoints, started.elapsed()),
            },
        };

        info!(
            status = %terminal.status,
            completed = terminal.completed_stages.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Research pipeline finished"
        );

        RunResult::extract(&terminal)
    }

    async fn drive(
        &self,
        mut state: ResearchState,
        checkpoints: &watch::Sender<Checkpoint>,
    ) -> ResearchState {
        let mut node = PipelineNode::START;

        while let PipelineNode::Stage(kind) = node {
            checkpoints.send_replace(Checkpoint {
                node,
                state: state.clone(),
            });

            state = match self.stages.get(&kind) {
                Some(stage) => run_stage(stage.as_ref(), state).await,
                None => {
                    state.fail_stage(StageError::new(kind, "no stage registered"));
                    state
                }
            };

            node = node.next(state.status);
        }

        checkpoints.send_replace(Checkpoint {
            node,
            state: state.clone(),
        });
        state
    }

    fn timed_out(checkpoints: &watch::Sender<Checkpoint>, elapsed: Duration) -> ResearchState {
        let Checkpoint { node, mut state } = checkpoints.borrow().clone();

        let stage = match node {
            PipelineNode::Stage(kind) => kind.to_string(),
            PipelineNode::Done => "finalization".to_string(),
        };
        let err = PipelineError::Timeout { elapsed, stage };

        warn!(error = %err, "Research pipeline timed out");
        state.fail(err.to_string());
        state
    }
}

/// Run the production pipeline with configuration from the environment.
///
/// Configuration problems are reported through the result like any other
/// failure.
pub async fn run_pipeline(topic: &str, depth: SearchDepth, num_queries: usize) -> RunResult {
    run_pipeline_with(Config::from_env(), topic, depth, num_queries).await
}

/// Run the production pipeline with an already loaded configuration.
pub async fn run_pipeline_with(
    config: Result<Config, ConfigError>,
    topic: &str,
    depth: SearchDepth,
    num_queries: usize,
) -> RunResult {
    let request = RunRequest::new(topic).with_depth(depth).with_queries(num_queries);

    match config.and_then(Pipeline::from_config) {
        Ok(pipeline) => pipeline.run(request).await,
        Err(err) => {
            warn!(error = %err, "Pipeline configuration failed");
            let mut state = ResearchState::new(topic, depth, num_queries);
            state.fail(format!("configuration error: {err}"));
            RunResult::extract(&state)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use PipelineNode::Done;
        use StageKind::*;
        let at = PipelineNode::Stage;

        let cases = [
            (at(Research), RunStatus::Completed, at(Draft)),
            (at(Research), RunStatus::Error, Done),
            (at(Draft), RunStatus::Completed, at(FactCheck)),
            (at(Draft), RunStatus::Error, Done),
            (at(FactCheck), RunStatus::Completed, at(Citation)),
            (at(FactCheck), RunStatus::Error, Done),
            (at(Citation), RunStatus::Completed, at(Improve)),
            (at(Citation), RunStatus::Error, Done),
            (at(Improve), RunStatus::Completed, Done),
            (at(Improve), RunStatus::Error, Done),
            (Done, RunStatus::Completed, Done),
        ];

        for (from, status, to) in cases {
            assert_eq!(from.next(status), to, "{from:?} on {status}");
        }
    }

    #[test]
    fn test_request_validation() {
        assert!(RunRequest::new("solar panel efficiency").validate().is_ok());
        assert!(RunRequest::new("   ").validate().is_err());
        assert_eq!(
            RunRequest::new("topic").with_queries(0).validate(),
            Err(PipelineError::InvalidInput("num_queries must be at least 1".to_string()))
        );
    }

    #[test]
    fn test_request_defaults() {
        let request = RunRequest::new("topic");
        assert_eq!(request.search_depth, SearchDepth::Basic);
        assert_eq!(request.num_queries, 3);
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = Config::default();
        assert!(matches!(
            Pipeline::from_config(config),
            Err(ConfigError::MissingVar("TAVILY_API_KEY"))
        ));
    }
}
