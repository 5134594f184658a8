//! Citation stage: extraction, style formatting, validation report and the
//! validated document, each as its own generation call

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{Stage, StageContext};
use crate::prompts::StagePrompts;
use crate::state::{ResearchState, ResearchUpdate, StageKind};

pub struct CitationStage {
    ctx: Arc<StageContext>,
}

impl CitationStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Self { ctx }
    }

    async fn call(&self, prompt: String, step: &'static str) -> Result<String> {
        self.ctx
            .generate(StageKind::Citation, &prompt)
            .await
            .with_context(|| format!("citation {step} failed"))
    }
}

#[async_trait]
impl Stage for CitationStage {
    fn kind(&self) -> StageKind {
        StageKind::Citation
    }

    async fn execute(&self, state: &ResearchState) -> Result<ResearchUpdate> {
        let document = state
            .corrected_draft
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| state.working_draft())
            .context("no document available for citation processing")?;

        let style = self.ctx.config.citation_style.as_str();
        debug!(style = %style, "Formatting citations");

        let analysis = self
            .call(StagePrompts::citation_extraction(document), "extraction")
            .await?;

        let formatted = self
            .call(
                StagePrompts::citation_formatting(
                    &state.topic,
                    document,
                    &analysis,
                    &state.synthesis,
                    style,
                ),
                "formatting",
            )
            .await?;

        let report = self
            .call(StagePrompts::citation_validation(&formatted), "validation")
            .await?;

        let validated = self
            .call(StagePrompts::citation_finalization(&formatted, &report), "finalization")
            .await?;

        Ok(ResearchUpdate::with_citations(analysis, formatted, report, validated))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::error::GenerationError;
    use crate::prompts::PromptKind;
    use crate::state::SearchDepth;

    fn checked_state() -> ResearchState {
        let mut state = ResearchState::new("topic", SearchDepth::Basic, 1);
        state.synthesis = "facts".to_string();
        state.draft = "draft".to_string();
        state.corrected_draft = Some("corrected".to_string());
        state
    }

    #[tokio::test]
    async fn test_citation_runs_four_separate_calls() {
        let generator = Arc::new(ScriptedGenerator::new());
        let stage = CitationStage::new(context(generator.clone(), Arc::new(StubSearch::default()), test_config()));

        let update = stage.execute(&checked_state()).await.unwrap();

        assert_eq!(update.citation_analysis.as_deref(), Some("Citation Extraction output"));
        assert_eq!(update.formatted_draft.as_deref(), Some("Citation Formatting output"));
        assert_eq!(
            update.citation_validation_report.as_deref(),
            Some("Citation Validation Report output")
        );
        assert_eq!(update.final_draft.as_deref(), Some("Citation Validated Document output"));
        for kind in [
            PromptKind::CitationExtraction,
            PromptKind::CitationFormatting,
            PromptKind::CitationValidation,
            PromptKind::CitationFinalization,
        ] {
            assert_eq!(generator.calls(kind), 1, "{kind}");
        }
    }

    #[tokio::test]
    async fn test_failed_step_produces_no_partial_update() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .fail(PromptKind::CitationValidation, GenerationError::transient("503")),
        );
        let stage = CitationStage::new(context(generator.clone(), Arc::new(StubSearch::default()), test_config()));

        let err = stage.execute(&checked_state()).await.unwrap_err();

        assert!(format!("{err:#}").contains("citation validation failed"));
        assert_eq!(generator.calls(PromptKind::CitationFinalization), 0);
        // 2 attempts on each of the 2 models
        assert_eq!(generator.calls(PromptKind::CitationValidation), 4);
    }
}
