//! Pipeline stages and the stage executor
//!
//! A [`Stage`] reads the current [`ResearchState`] and returns a
//! [`ResearchUpdate`]; it never touches the state itself. [`run_stage`] wraps
//! every stage with the same contract:
//!
//! - a failed state passes through untouched
//! - success applies the update in one step and marks the stage completed
//! - any error, or a panic, becomes `status = Error` with a message naming the
//!   stage
//!
//! Stages share one [`StageContext`] holding the collaborators, the fallback
//! invoker and the configuration.

mod citation;
mod draft;
mod fact_check;
mod improve;
mod research;

pub use citation::CitationStage;
pub use draft::DraftStage;
pub use fact_check::FactCheckStage;
pub use improve::ImproveStage;
pub use research::{format_search_results, parse_queries, ResearchStage};

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{GenerationError, InvokeError, StageError};
use crate::generation::Generator;
use crate::invoker::FallbackInvoker;
use crate::prompts::PromptKind;
use crate::search::SearchClient;
use crate::state::{ResearchState, ResearchUpdate, RunStatus, SearchDepth, SearchHit, StageKind};

/// One processing step of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Compute this stage's output from the current state.
    async fn execute(&self, state: &ResearchState) -> anyhow::Result<ResearchUpdate>;
}

/// Collaborators and settings shared by every stage
pub struct StageContext {
    pub generator: Arc<dyn Generator>,
    pub search: Arc<dyn SearchClient>,
    pub invoker: FallbackInvoker,
    pub config: Arc<Config>,
}

impl StageContext {
    pub fn new(
        generator: Arc<dyn Generator>,
        search: Arc<dyn SearchClient>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            generator,
            search,
            invoker: FallbackInvoker::new(config.retry.clone()),
            config,
        }
    }

    /// Generate text for `stage`, falling back across its configured models.
    ///
    /// A blank response counts as a permanent failure of that endpoint.
    pub async fn generate(&self, stage: StageKind, prompt: &str) -> Result<String, InvokeError> {
        let endpoints = self.config.endpoints_for(stage);
        let generator = &self.generator;

        debug!(
            stage = %stage,
            generator = generator.name(),
            prompt = ?PromptKind::detect(prompt),
            endpoints = ?endpoints,
            "Requesting generation"
        );

        self.invoker
            .invoke(&endpoints, |endpoint| async move {
                let text = generator.generate(prompt, &endpoint).await?;
                if text.trim().is_empty() {
                    return Err(GenerationError::permanent(format!(
                        "{endpoint} returned an empty response"
                    )));
                }
                Ok::<_, GenerationError>(text)
            })
            .await
    }

    /// Run one search through the invoker, so transient search failures are
    /// retried like generation failures.
    pub async fn search(
        &self,
        query: &str,
        depth: SearchDepth,
    ) -> Result<Vec<SearchHit>, InvokeError> {
        let endpoints = [self.search.name().to_string()];
        let search = &self.search;
        let max_results = self.config.max_search_results;

        self.invoker
            .invoke(&endpoints, |_| async move {
                search.search(query, depth, max_results).await
            })
            .await
    }
}

/// The five stages in pipeline order, sharing one context
pub fn default_stages(ctx: Arc<StageContext>) -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(ResearchStage::new(Arc::clone(&ctx))),
        Arc::new(DraftStage::new(Arc::clone(&ctx))),
        Arc::new(FactCheckStage::new(Arc::clone(&ctx))),
        Arc::new(CitationStage::new(Arc::clone(&ctx))),
        Arc::new(ImproveStage::new(ctx)),
    ]
}

/// Run a stage under the executor contract. Never fails and never panics.
pub async fn run_stage(stage: &dyn Stage, mut state: ResearchState) -> ResearchState {
    let kind = stage.kind();

    if state.is_failed() {
        debug!(stage = %kind, "Skipping stage, run already failed");
        return state;
    }

    state.status = RunStatus::InProgress;
    info!(stage = %kind, topic = %state.topic, "Stage started");
    let started = Instant::now();

    let outcome = AssertUnwindSafe(stage.execute(&state)).catch_unwind().await;

    match outcome {
        Ok(Ok(update)) => {
            state.apply_update(update);
            state.mark_completed(kind);
            info!(
                stage = %kind,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stage completed"
            );
        }
        Ok(Err(err)) => {
            let err = StageError::new(kind, format!("{err:#}"));
            warn!(stage = %kind, error = %err, "Stage failed");
            state.fail_stage(err);
        }
        Err(payload) => {
            let err = StageError::new(kind, format!("panicked: {}", panic_message(&*payload)));
            warn!(stage = %kind, error = %err, "Stage panicked");
            state.fail_stage(err);
        }
    }

    state
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Scripted collaborators for stage unit tests
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::error::SearchError;
    use crate::invoker::RetryPolicy;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers each prompt kind with a fixed text, optionally failing one kind
    #[derive(Default)]
    pub struct ScriptedGenerator {
        responses: HashMap<PromptKind, String>,
        failures: HashMap<PromptKind, GenerationError>,
        calls: Mutex<Vec<(PromptKind, String)>>,
    }

    impl ScriptedGenerator {
        pub fn new() -> Self {
            let mut generator = Self::default();
            for kind in PromptKind::ALL {
                generator.responses.insert(kind, format!("{kind} output"));
            }
            generator
        }

        pub fn respond(mut self, kind: PromptKind, text: &str) -> Self {
            self.responses.insert(kind, text.to_string());
            self
        }

        pub fn fail(mut self, kind: PromptKind, error: GenerationError) -> Self {
            self.failures.insert(kind, error);
            self
        }

        pub fn calls(&self, kind: PromptKind) -> usize {
            self.calls.lock().unwrap().iter().filter(|(k, _)| *k == kind).count()
        }

        pub fn endpoints_called(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, prompt: &str, endpoint: &str) -> Result<String, GenerationError> {
            let kind = PromptKind::detect(prompt).expect("prompt without a known heading");
            self.calls.lock().unwrap().push((kind, endpoint.to_string()));

            if let Some(err) = self.failures.get(&kind) {
                return Err(err.clone());
            }
            Ok(self.responses.get(&kind).cloned().unwrap_or_default())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// Returns two hits per query unless the query is marked as failing
    #[derive(Default)]
    pub struct StubSearch {
        failing: Vec<String>,
        pub queries: Mutex<Vec<String>>,
    }

    impl StubSearch {
        pub fn failing_on(queries: &[&str]) -> Self {
            Self {
                failing: queries.iter().map(|q| q.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl SearchClient for StubSearch {
        async fn search(
            &self,
            query: &str,
            _depth: SearchDepth,
            _max_results: usize,
        ) -> Result<Vec<SearchHit>, SearchError> {
            self.queries.lock().unwrap().push(query.to_string());
            if self.failing.iter().any(|q| q == query) {
                return Err(SearchError::permanent(format!("search failed for {query}")));
            }
            let slug = query.replace(' ', "-");
            Ok(vec![
                SearchHit::new(format!("https://a.example/{slug}"), format!("About {query}"), 0.9)
                    .with_title(format!("{query} overview")),
                SearchHit::new(format!("https://b.example/{slug}"), format!("More on {query}"), 0.7)
                    .with_title(format!("{query} details")),
            ])
        }

        fn name(&self) -> &str {
            "stub-search"
        }
    }

    pub fn test_config() -> Config {
        let mut config = Config::default();
        config.models = vec!["model-a".to_string(), "model-b".to_string()];
        config.retry = RetryPolicy::new(2).with_backoff_base(Duration::ZERO);
        config
    }

    pub fn context(
        generator: Arc<ScriptedGenerator>,
        search: Arc<StubSearch>,
        config: Config,
    ) -> Arc<StageContext> {
        Arc::new(StageContext::new(generator, search, Arc::new(config)))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    struct PanickingStage;

    #[async_trait]
    impl Stage for PanickingStage {
        fn kind(&self) -> StageKind {
            StageKind::Citation
        }

        async fn execute(&self, _state: &ResearchState) -> anyhow::Result<ResearchUpdate> {
            panic!("formatter exploded");
        }
    }

    struct FixedStage(ResearchUpdate);

    #[async_trait]
    impl Stage for FixedStage {
        fn kind(&self) -> StageKind {
            StageKind::Draft
        }

        async fn execute(&self, _state: &ResearchState) -> anyhow::Result<ResearchUpdate> {
            Ok(self.0.clone())
        }
    }

    struct FailingStage;

    #[async_trait]
    impl Stage for FailingStage {
        fn kind(&self) -> StageKind {
            StageKind::FactCheck
        }

        async fn execute(&self, _state: &ResearchState) -> anyhow::Result<ResearchUpdate> {
            Err(anyhow::anyhow!("upstream refused").context("fact check call failed"))
        }
    }

    fn fresh_state() -> ResearchState {
        ResearchState::new("solar panel efficiency", SearchDepth::Basic, 2)
    }

    #[tokio::test]
    async fn test_success_applies_update_and_marks_completed() {
        let stage = FixedStage(ResearchUpdate::with_draft("a draft", None));
        let state = run_stage(&stage, fresh_state()).await;

        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.draft, "a draft");
        assert_eq!(state.completed_stages, vec![StageKind::Draft]);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_error_is_recorded_with_stage_name() {
        let state = run_stage(&FailingStage, fresh_state()).await;

        assert_eq!(state.status, RunStatus::Error);
        let error = state.error.unwrap();
        assert!(error.starts_with("fact_check stage failed"));
        assert!(error.contains("upstream refused"));
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let state = run_stage(&PanickingStage, fresh_state()).await;

        assert_eq!(state.status, RunStatus::Error);
        assert_eq!(
            state.error.as_deref(),
            Some("citation stage failed: panicked: formatter exploded")
        );
    }

    #[tokio::test]
    async fn test_failed_state_passes_through() {
        let mut failed = fresh_state();
        failed.fail("research stage failed: no results");
        let before = failed.clone();

        let stage = FixedStage(ResearchUpdate::with_draft("should not land", None));
        let after = run_stage(&stage, failed).await;

        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_generate_falls_back_to_next_model() {
        let generator = Arc::new(ScriptedGenerator::new().respond(PromptKind::Draft, "   "));
        let ctx = context(generator.clone(), Arc::new(StubSearch::default()), test_config());

        let err = ctx
            .generate(StageKind::Draft, &crate::prompts::StagePrompts::draft("t", "s"))
            .await
            .unwrap_err();

        // Blank output is permanent: one attempt per endpoint, in order
        assert_eq!(generator.endpoints_called(), vec!["model-a", "model-b"]);
        assert!(err.to_string().contains("empty response"));
    }

    #[tokio::test]
    async fn test_search_retries_transient_failures() {
        struct FlakySearch {
            calls: std::sync::atomic::AtomicUsize,
        }

        #[async_trait]
        impl SearchClient for FlakySearch {
            async fn search(
                &self,
                _query: &str,
                _depth: SearchDepth,
                _max_results: usize,
            ) -> Result<Vec<SearchHit>, crate::error::SearchError> {
                let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if call == 0 {
                    Err(crate::error::SearchError::transient("429"))
                } else {
                    Ok(vec![SearchHit::new("https://ok.example", "ok", 1.0)])
                }
            }

            fn name(&self) -> &str {
                "flaky"
            }
        }

        let search = Arc::new(FlakySearch {
            calls: Default::default(),
        });
        let ctx = StageContext::new(
            Arc::new(ScriptedGenerator::new()),
            search.clone(),
            Arc::new(test_config()),
        );

        let hits = ctx.search("q", SearchDepth::Basic).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(search.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
