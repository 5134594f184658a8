//! # deep-research
//!
//! A multi-stage research pipeline: generate search queries, search the web,
//! synthesize, draft, fact-check, normalize citations and polish the result.
//!
//! Every stage talks to its collaborators through a fallback-capable invoker,
//! so a transient failure of one model or of the search API is retried, and a
//! model that keeps failing is replaced by the next one in the roster. A stage
//! that still fails stops the run, and the caller gets back whatever the
//! pipeline had produced so far.
//!
//! ```ignore
//! use deep_research::{run_pipeline, SearchDepth};
//!
//! let result = run_pipeline("solar panel efficiency", SearchDepth::Basic, 3).await;
//! println!("{}", result.best_available_document);
//! ```

pub mod config;
pub mod error;
pub mod generation;
pub mod invoker;
pub mod pipeline;
pub mod prompts;
pub mod result;
pub mod search;
pub mod stages;
pub mod state;

pub use config::{Config, LlmProvider};
pub use error::{
    CapabilityError, ConfigError, EndpointFailure, GenerationError, InvokeError, PipelineError,
    SearchError, StageError,
};
pub use generation::{Generator, RigGenerator};
pub use invoker::{FallbackInvoker, RetryPolicy};
pub use pipeline::{run_pipeline, run_pipeline_with, Pipeline, PipelineNode, RunRequest};
pub use result::{extract, DocumentSource, RunResult, StageOutputs};
pub use search::{SearchClient, TavilyClient, TavilyError};
pub use stages::{run_stage, Stage, StageContext};
pub use state::{
    QueryResults, ResearchState, ResearchUpdate, RunStatus, SearchDepth, SearchHit, StageKind,
};
