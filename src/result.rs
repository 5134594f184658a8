//! Run result extraction
//!
//! Turns a terminal (possibly partial) [`ResearchState`] into a [`RunResult`].
//! The best available document is picked by fixed precedence:
//!
//! ```text
//! final improvement > citation-validated > citation-formatted > corrected
//!     > refined draft > raw draft > synthesis
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::state::{QueryResults, ResearchState, RunStatus, StageKind};

/// Which state field supplied `best_available_document`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    FinalImprovement,
    ValidatedDraft,
    FormattedDraft,
    CorrectedDraft,
    RefinedDraft,
    Draft,
    Synthesis,
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentSource::FinalImprovement => "final improvement",
            DocumentSource::ValidatedDraft => "citation-validated draft",
            DocumentSource::FormattedDraft => "citation-formatted draft",
            DocumentSource::CorrectedDraft => "fact-corrected draft",
            DocumentSource::RefinedDraft => "refined draft",
            DocumentSource::Draft => "draft",
            DocumentSource::Synthesis => "research synthesis",
        })
    }
}

/// Every intermediate output, as far as the run got
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutputs {
    pub queries: Vec<String>,
    pub search_results: Vec<QueryResults>,
    pub synthesis: String,
    pub draft: String,
    pub improved_draft: Option<String>,
    pub fact_check_report: Option<String>,
    pub corrected_draft: Option<String>,
    pub citation_analysis: Option<String>,
    pub formatted_draft: Option<String>,
    pub citation_validation_report: Option<String>,
    pub final_draft: Option<String>,
}

/// Normalized outcome of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub topic: String,
    pub status: RunStatus,
    /// Empty when no stage produced any text
    pub best_available_document: String,
    pub document_source: Option<DocumentSource>,
    pub stage_outputs: StageOutputs,
    pub completed_stages: Vec<StageKind>,
    pub error: Option<String>,
}

impl RunResult {
    /// Build a result from a terminal state. Never fails.
    pub fn extract(state: &ResearchState) -> Self {
        let (best_available_document, document_source) = match best_document(state) {
            Some((text, source)) => (text.to_string(), Some(source)),
            None => (String::new(), None),
        };

        Self {
            topic: state.topic.clone(),
            status: state.status,
            best_available_document,
            document_source,
            stage_outputs: StageOutputs {
                queries: state.queries.clone(),
                search_results: state.search_results.clone(),
                synthesis: state.synthesis.clone(),
                draft: state.draft.clone(),
                improved_draft: state.improved_draft.clone(),
                fact_check_report: state.fact_check_report.clone(),
                corrected_draft: state.corrected_draft.clone(),
                citation_analysis: state.citation_analysis.clone(),
                formatted_draft: state.formatted_draft.clone(),
                citation_validation_report: state.citation_validation_report.clone(),
                final_draft: state.final_draft.clone(),
            },
            completed_stages: state.completed_stages.clone(),
            error: state.error.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Unique source URLs in the order they were found
    pub fn source_urls(&self) -> Vec<&str> {
        let mut urls: Vec<&str> = Vec::new();
        for hit in self.stage_outputs.search_results.iter().flat_map(|r| &r.hits) {
            if !urls.contains(&hit.url.as_str()) {
                urls.push(&hit.url);
            }
        }
        urls
    }
}

/// Free-function form of [`RunResult::extract`]
pub fn extract(state: &ResearchState) -> RunResult {
    RunResult::extract(state)
}

fn best_document(state: &ResearchState) -> Option<(&str, DocumentSource)> {
    // improved_draft holds the final improvement only once Improve completed;
    // before that it is drafting's refinement pass.
    let improved = state.has_completed(StageKind::Improve);

    let candidates = [
        (state.improved_draft.as_deref().filter(|_| improved), DocumentSource::FinalImprovement),
        (state.final_draft.as_deref(), DocumentSource::ValidatedDraft),
        (state.formatted_draft.as_deref(), DocumentSource::FormattedDraft),
        (state.corrected_draft.as_deref(), DocumentSource::CorrectedDraft),
        (state.improved_draft.as_deref().filter(|_| !improved), DocumentSource::RefinedDraft),
        (Some(state.draft.as_str()), DocumentSource::Draft),
        (Some(state.synthesis.as_str()), DocumentSource::Synthesis),
    ];

    candidates
        .into_iter()
        .find_map(|(text, source)| text.filter(|t| !t.trim().is_empty()).map(|t| (t, source)))
}
