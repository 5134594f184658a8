//! Research stage: query generation, concurrent search, synthesis

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use super::{Stage, StageContext};
use crate::prompts::StagePrompts;
use crate::state::{QueryResults, ResearchState, ResearchUpdate, SearchDepth, StageKind};

pub struct ResearchStage {
    ctx: Arc<StageContext>,
}

impl ResearchStage {
    pub fn new(ctx: Arc<StageContext>) -> Self {
        Self { ctx }
    }

    /// Search every query with bounded concurrency. Results keep query order
    /// and a failed search is recorded instead of aborting the rest.
    async fn search_all(&self, queries: &[String], depth: SearchDepth) -> Vec<QueryResults> {
        let ctx = &self.ctx;
        let concurrency = ctx.config.max_concurrent_searches.max(1);

        stream::iter(queries.iter().cloned())
            .map(|query| async move {
                match ctx.search(&query, depth).await {
                    Ok(hits) => {
                        info!(query = %query, hits = hits.len(), "Search finished");
                        QueryResults::found(query, hits)
                    }
                    Err(err) => {
                        warn!(query = %query, error = %err, "Search failed");
                        QueryResults::failed(query, err.to_string())
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await
    }
}

#[async_trait]
impl Stage for ResearchStage {
    fn kind(&self) -> StageKind {
        StageKind::Research
    }

    async fn execute(&self, state: &ResearchState) -> Result<ResearchUpdate> {
        let prompt = StagePrompts::query_generation(&state.topic, state.num_queries);
        let raw = self
            .ctx
            .generate(StageKind::Research, &prompt)
            .await
            .context("search query generation failed")?;

        let queries = parse_queries(&raw, &state.topic, state.num_queries);
        info!(count = queries.len(), queries = ?queries, "Search queries ready");

        let results = self.search_all(&queries, state.search_depth).await;

        if let Some(first_failure) = results.iter().find_map(|r| r.error.as_deref()) {
            if results.iter().all(QueryResults::is_failed) {
                bail!("all {} searches failed, first error: {first_failure}", results.len());
            }
        }

        let formatted = format_search_results(&results);
        let synthesis = self
            .ctx
            .generate(
                StageKind::Research,
                &StagePrompts::synthesis(&state.topic, &formatted),
            )
            .await
            .context("research synthesis failed")?;

        Ok(ResearchUpdate::with_research(queries, results, synthesis))
    }
}

/// Turn a model's query list into clean, unique queries.
///
/// Numbering, bullets and quotes are stripped, introductory lines ending in a
/// colon are skipped, and at most `limit` queries are kept. An empty result
/// falls back to the topic itself.
pub fn parse_queries(raw: &str, topic: &str, limit: usize) -> Vec<String> {
    let mut queries: Vec<String> = Vec::new();

    for line in raw.lines() {
        if queries.len() >= limit {
            break;
        }
        let query = clean_query_line(line);
        if query.is_empty() || query.ends_with(':') {
            continue;
        }
        if queries.iter().any(|q| q.eq_ignore_ascii_case(&query)) {
            continue;
        }
        queries.push(query);
    }

    if queries.is_empty() {
        queries.push(topic.trim().to_string());
    }
    queries
}

fn clean_query_line(line: &str) -> String {
    let mut text = line.trim();

    // "1. query" or "2) query", but not "1.5 GW panels"
    let digits = text.len() - text.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        let rest = &text[digits..];
        if let Some(after) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            if after.is_empty() || after.starts_with(char::is_whitespace) {
                text = after.trim_start();
            }
        }
    }

    text = text.trim_start_matches(|c: char| matches!(c, '-' | '*' | '•')).trim();
    text.trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*'))
        .trim()
        .to_string()
}

/// Render grouped search results as the synthesis prompt expects them.
pub fn format_search_results(results: &[QueryResults]) -> String {
    let mut out = String::new();

    for group in results {
        let _ = write!(out, "\n## RESULTS FOR: {}\n\n", group.query);

        if group.hits.is_empty() {
            out.push_str("No results found for this query.\n\n");
            continue;
        }

        for (i, hit) in group.hits.iter().enumerate() {
            let title = if hit.title.is_empty() { "No title" } else { &hit.title };
            let _ = writeln!(out, "### Result {}: {}", i + 1, title);
            let _ = writeln!(out, "URL: {}", hit.url);
            let _ = write!(out, "Content: {}\n\n", hit.content);
        }
    }

    out
}
