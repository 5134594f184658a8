//! Research pipeline state
//!
//! `ResearchState` is the single record threaded through every stage. Stages
//! never mutate it directly: they return a [`ResearchUpdate`] which the stage
//! executor applies in one step once the stage has succeeded, so a failing
//! stage leaves no half-written output behind.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// Search depth passed through to the search collaborator
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    /// Fast search with basic results
    #[default]
    Basic,
    /// More thorough search with detailed results
    Advanced,
}

impl SearchDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchDepth::Basic => "basic",
            SearchDepth::Advanced => "advanced",
        }
    }
}

impl fmt::Display for SearchDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(SearchDepth::Basic),
            "advanced" => Ok(SearchDepth::Advanced),
            other => Err(format!("unknown search depth '{other}' (expected basic or advanced)")),
        }
    }
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    InProgress,
    Completed,
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        })
    }
}

/// The processing stages, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Research,
    Draft,
    FactCheck,
    Citation,
    Improve,
}

impl StageKind {
    /// All stages in execution order
    pub const ALL: [StageKind; 5] = [
        StageKind::Research,
        StageKind::Draft,
        StageKind::FactCheck,
        StageKind::Citation,
        StageKind::Improve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Research => "research",
            StageKind::Draft => "draft",
            StageKind::FactCheck => "fact_check",
            StageKind::Citation => "citation",
            StageKind::Improve => "improve",
        }
    }

    /// The stage that follows this one on success
    pub fn successor(&self) -> Option<StageKind> {
        match self {
            StageKind::Research => Some(StageKind::Draft),
            StageKind::Draft => Some(StageKind::FactCheck),
            StageKind::FactCheck => Some(StageKind::Citation),
            StageKind::Citation => Some(StageKind::Improve),
            StageKind::Improve => None,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One search hit returned by the search collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub content: String,
    /// Relevance score (0-1)
    pub score: f64,
}

impl SearchHit {
    pub fn new(url: impl Into<String>, content: impl Into<String>, score: f64) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            content: content.into(),
            score,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// Search hits re-associated with the query that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResults {
    pub query: String,
    pub hits: Vec<SearchHit>,
    /// Set when the search for this query failed; `hits` is then empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResults {
    pub fn found(query: impl Into<String>, hits: Vec<SearchHit>) -> Self {
        Self {
            query: query.into(),
            hits,
            error: None,
        }
    }

    pub fn failed(query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            hits: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// The record threaded through the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchState {
    /// Research topic (immutable after construction)
    pub topic: String,
    pub search_depth: SearchDepth,
    pub num_queries: usize,

    // Research stage
    pub queries: Vec<String>,
    pub search_results: Vec<QueryResults>,
    pub synthesis: String,

    // Draft stage
    pub draft: String,
    /// Drafting's refinement pass, later replaced by the improve stage
    pub improved_draft: Option<String>,

    // Fact-check stage
    pub fact_check_report: Option<String>,
    pub corrected_draft: Option<String>,

    // Citation stage
    pub citation_analysis: Option<String>,
    pub formatted_draft: Option<String>,
    pub citation_validation_report: Option<String>,
    pub final_draft: Option<String>,

    pub status: RunStatus,
    /// Set exactly when `status == Error`
    pub error: Option<String>,

    /// Stages that finished successfully, in order
    pub completed_stages: Vec<StageKind>,
}

impl ResearchState {
    pub fn new(topic: impl Into<String>, search_depth: SearchDepth, num_queries: usize) -> Self {
        Self {
            topic: topic.into(),
            search_depth,
            num_queries,
            status: RunStatus::InProgress,
            ..Default::default()
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Error
    }

    pub fn has_completed(&self, stage: StageKind) -> bool {
        self.completed_stages.contains(&stage)
    }

    /// All search hits in query order
    pub fn sources(&self) -> impl Iterator<Item = &SearchHit> {
        self.search_results.iter().flat_map(|r| r.hits.iter())
    }

    /// The most refined draft produced before fact-checking
    pub fn working_draft(&self) -> Option<&str> {
        first_non_empty([self.improved_draft.as_deref(), Some(self.draft.as_str())])
    }

    /// The most refined document produced before the improve stage
    pub fn latest_document(&self) -> Option<&str> {
        first_non_empty([
            self.final_draft.as_deref(),
            self.formatted_draft.as_deref(),
            self.corrected_draft.as_deref(),
            self.improved_draft.as_deref(),
            Some(self.draft.as_str()),
        ])
    }

    /// Apply a stage's output. Ignored once the run has failed.
    pub fn apply_update(&mut self, update: ResearchUpdate) {
        if self.is_failed() {
            return;
        }

        if let Some(queries) = update.queries {
            self.queries = queries;
        }
        if let Some(results) = update.search_results {
            self.search_results = results;
        }
        if let Some(synthesis) = update.synthesis {
            self.synthesis = synthesis;
        }
        if let Some(draft) = update.draft {
            self.draft = draft;
        }
        if update.improved_draft.is_some() {
            self.improved_draft = update.improved_draft;
        }
        if update.fact_check_report.is_some() {
            self.fact_check_report = update.fact_check_report;
        }
        if update.corrected_draft.is_some() {
            self.corrected_draft = update.corrected_draft;
        }
        if update.citation_analysis.is_some() {
            self.citation_analysis = update.citation_analysis;
        }
        if update.formatted_draft.is_some() {
            self.formatted_draft = update.formatted_draft;
        }
        if update.citation_validation_report.is_some() {
            self.citation_validation_report = update.citation_validation_report;
        }
        if update.final_draft.is_some() {
            self.final_draft = update.final_draft;
        }
    }

    /// Record a stage success
    pub fn mark_completed(&mut self, stage: StageKind) {
        if self.is_failed() {
            return;
        }
        self.status = RunStatus::Completed;
        self.completed_stages.push(stage);
    }

    /// Move to the error status. The first recorded error wins.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.is_failed() {
            return;
        }
        self.status = RunStatus::Error;
        self.error = Some(reason.into());
    }

    pub fn fail_stage(&mut self, err: StageError) {
        self.fail(err.to_string());
    }
}

fn first_non_empty<'a, const N: usize>(candidates: [Option<&'a str>; N]) -> Option<&'a str> {
    candidates
        .into_iter()
        .flatten()
        .find(|text| !text.trim().is_empty())
}

/// Fields written by one stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResearchUpdate {
    pub queries: Option<Vec<String>>,
    pub search_results: Option<Vec<QueryResults>>,
    pub synthesis: Option<String>,
    pub draft: Option<String>,
    pub improved_draft: Option<String>,
    pub fact_check_report: Option<String>,
    pub corrected_draft: Option<String>,
    pub citation_analysis: Option<String>,
    pub formatted_draft: Option<String>,
    pub citation_validation_report: Option<String>,
    pub final_draft: Option<String>,
}

impl ResearchUpdate {
    pub fn with_research(
        queries: Vec<String>,
        search_results: Vec<QueryResults>,
        synthesis: impl Into<String>,
    ) -> Self {
        Self {
            queries: Some(queries),
            search_results: Some(search_results),
            synthesis: Some(synthesis.into()),
            ..Default::default()
        }
    }

    pub fn with_draft(draft: impl Into<String>, refined: Option<String>) -> Self {
        Self {
            draft: Some(draft.into()),
            improved_draft: refined,
            ..Default::default()
        }
    }

    pub fn with_fact_check(report: impl Into<String>, corrected: impl Into<String>) -> Self {
        Self {
            fact_check_report: Some(report.into()),
            corrected_draft: Some(corrected.into()),
            ..Default::default()
        }
    }

    pub fn with_citations(
        analysis: impl Into<String>,
        formatted: impl Into<String>,
        validation_report: impl Into<String>,
        final_draft: impl Into<String>,
    ) -> Self {
        Self {
            citation_analysis: Some(analysis.into()),
            formatted_draft: Some(formatted.into()),
            citation_validation_report: Some(validation_report.into()),
            final_draft: Some(final_draft.into()),
            ..Default::default()
        }
    }

    pub fn with_improvement(improved: impl Into<String>) -> Self {
        Self {
            improved_draft: Some(improved.into()),
            ..Default::default()
        }
    }
}
