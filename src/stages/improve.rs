//! Final improvement stage

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{Stage, StageContext};
use crate::prompts::StagePrompts;
use crate::state::{ResearchState, ResearchUpdate, StageKind};

pub struct ImproveStage {
    ctx: Arc<StageContext>,
}

impl ImproveStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Stage for ImproveStage {
    fn kind(&self) -> StageKind {
        StageKind::Improve
    }

    async fn execute(&self, state: &ResearchState) -> Result<ResearchUpdate> {
        let document = state
            .latest_document()
            .context("no document available to improve")?;

        let improved = self
            .ctx
            .generate(
                StageKind::Improve,
                &StagePrompts::final_improvement(&state.topic, document),
            )
            .await
            .context("final improvement failed")?;

        Ok(ResearchUpdate::with_improvement(improved))
    }
}
