//! Fact-checking stage: verify the working draft against the synthesis and
//! apply the corrections

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{Stage, StageContext};
use crate::prompts::StagePrompts;
use crate::state::{ResearchState, ResearchUpdate, StageKind};

pub struct FactCheckStage {
    ctx: Arc<StageContext>,
}

impl FactCheckStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Stage for FactCheckStage {
    fn kind(&self) -> StageKind {
        StageKind::FactCheck
    }

    async fn execute(&self, state: &ResearchState) -> Result<ResearchUpdate> {
        let draft = state
            .working_draft()
            .context("no draft available to fact-check")?;

        let report = self
            .ctx
            .generate(
                StageKind::FactCheck,
                &StagePrompts::fact_check(&state.topic, &state.synthesis, draft),
            )
            .await
            .context("fact check failed")?;

        let corrected = self
            .ctx
            .generate(
                StageKind::FactCheck,
                &StagePrompts::correction(&state.topic, draft, &report),
            )
            .await
            .context("draft correction failed")?;

        Ok(ResearchUpdate::with_fact_check(report, corrected))
    }
}
