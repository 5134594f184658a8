//! Drafting stage: first draft from the synthesis, plus an optional
//! refinement pass

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{Stage, StageContext};
use crate::prompts::StagePrompts;
use crate::state::{ResearchState, ResearchUpdate, StageKind};

pub struct DraftStage {
    ctx: Arc<StageContext>,
}

impl DraftStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Stage for DraftStage {
    fn kind(&self) -> StageKind {
        StageKind::Draft
    }

    async fn execute(&self, state: &ResearchState) -> Result<ResearchUpdate> {
        if state.synthesis.trim().is_empty() {
            bail!("no synthesis available to draft from");
        }

        let draft = self
            .ctx
            .generate(StageKind::Draft, &StagePrompts::draft(&state.topic, &state.synthesis))
            .await
            .context("drafting failed")?;

        if !self.ctx.config.refine_draft {
            debug!("Draft refinement disabled");
            return Ok(ResearchUpdate::with_draft(draft, None));
        }

        let refined = self
            .ctx
            .generate(
                StageKind::Draft,
                &StagePrompts::draft_refinement(&state.topic, &draft),
            )
            .await
            .context("draft refinement failed")?;

        Ok(ResearchUpdate::with_draft(draft, Some(refined)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::error::GenerationError;
    use crate::prompts::PromptKind;
    use crate::state::SearchDepth;

    fn researched_state() -> ResearchState {
        let mut state = ResearchState::new("solar panel efficiency", SearchDepth::Basic, 2);
        state.synthesis = "Panels convert 20% of sunlight.".to_string();
        state
    }

    #[tokio::test]
    async fn test_draft_with_refinement() {
        let generator = Arc::new(ScriptedGenerator::new());
        let stage = DraftStage::new(context(generator.clone(), Arc::new(StubSearch::default()), test_config()));

        let update = stage.execute(&researched_state()).await.unwrap();

        assert_eq!(update.draft.as_deref(), Some("Document Drafting output"));
        assert_eq!(update.improved_draft.as_deref(), Some("Draft Refinement output"));
        assert_eq!(generator.calls(PromptKind::DraftRefinement), 1);
    }

    #[tokio::test]
    async fn test_refinement_can_be_disabled() {
        let generator = Arc::new(ScriptedGenerator::new());
        let mut config = test_config();
        config.refine_draft = false;
        let stage = DraftStage::new(context(generator.clone(), Arc::new(StubSearch::default()), config));

        let update = stage.execute(&researched_state()).await.unwrap();

        assert!(update.improved_draft.is_none());
        assert_eq!(generator.calls(PromptKind::DraftRefinement), 0);
    }

    #[tokio::test]
    async fn test_missing_synthesis_is_rejected() {
        let generator = Arc::new(ScriptedGenerator::new());
        let stage = DraftStage::new(context(generator.clone(), Arc::new(StubSearch::default()), test_config()));

        let state = ResearchState::new("topic", SearchDepth::Basic, 1);
        let err = stage.execute(&state).await.unwrap_err();

        assert_eq!(err.to_string(), "no synthesis available to draft from");
        assert_eq!(generator.calls(PromptKind::Draft), 0);
    }

    #[tokio::test]
    async fn test_refinement_failure_fails_the_stage() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .fail(PromptKind::DraftRefinement, GenerationError::permanent("context too long")),
        );
        let stage = DraftStage::new(context(generator, Arc::new(StubSearch::default()), test_config()));

        let err = stage.execute(&researched_state()).await.unwrap_err();
        assert!(format!("{err:#}").contains("draft refinement failed"));
    }
}
