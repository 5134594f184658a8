//! Stage prompt templates
//!
//! Every prompt opens with a fixed Markdown heading for its [`PromptKind`], so
//! logs and test doubles can tell which step a generation call belongs to
//! without parsing the body.

use std::fmt;

/// The distinct generation steps of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    QueryGeneration,
    Synthesis,
    Draft,
    DraftRefinement,
    FactCheck,
    Correction,
    CitationExtraction,
    CitationFormatting,
    CitationValidation,
    CitationFinalization,
    FinalImprovement,
}

impl PromptKind {
    pub const ALL: [PromptKind; 11] = [
        PromptKind::QueryGeneration,
        PromptKind::Synthesis,
        PromptKind::Draft,
        PromptKind::DraftRefinement,
        PromptKind::FactCheck,
        PromptKind::Correction,
        PromptKind::CitationExtraction,
        PromptKind::CitationFormatting,
        PromptKind::CitationValidation,
        PromptKind::CitationFinalization,
        PromptKind::FinalImprovement,
    ];

    /// First line of every prompt of this kind
    pub fn heading(&self) -> &'static str {
        match self {
            PromptKind::QueryGeneration => "# Search Query Generation",
            PromptKind::Synthesis => "# Research Synthesis",
            PromptKind::Draft => "# Document Drafting",
            PromptKind::DraftRefinement => "# Draft Refinement",
            PromptKind::FactCheck => "# Fact Check",
            PromptKind::Correction => "# Factual Correction",
            PromptKind::CitationExtraction => "# Citation Extraction",
            PromptKind::CitationFormatting => "# Citation Formatting",
            PromptKind::CitationValidation => "# Citation Validation Report",
            PromptKind::CitationFinalization => "# Citation Validated Document",
            PromptKind::FinalImprovement => "# Final Improvement",
        }
    }

    /// Identify a prompt by its heading line
    pub fn detect(prompt: &str) -> Option<PromptKind> {
        let first_line = prompt.lines().next()?.trim_end();
        Self::ALL.into_iter().find(|kind| kind.heading() == first_line)
    }
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.heading().trim_start_matches("# "))
    }
}

/// Prompt builders for each stage
pub struct StagePrompts;

impl StagePrompts {
    pub fn query_generation(topic: &str, num_queries: usize) -> String {
        format!(
            r#"{heading}

You are a research assistant. Write {num_queries} web search queries that together
cover the most important aspects of the research topic below.

Research topic: {topic}

Rules:
- Output exactly {num_queries} queries, one per line
- Each query must be specific and focus on a different aspect of the topic
- Do not add explanations, headings, or blank lines"#,
            heading = PromptKind::QueryGeneration.heading(),
        )
    }

    pub fn synthesis(topic: &str, formatted_results: &str) -> String {
        format!(
            r#"{heading}

You are a research assistant combining information from several web searches.

Research topic: {topic}

## Search Results

{formatted_results}

## Instructions

1. Extract the key facts, concepts and insights relevant to the topic
2. Organize them so the most important points stand out
3. Note where sources agree or disagree
4. Cite sources inline using [Source: URL] notation

Write a thorough, accurate and well-organized synthesis."#,
            heading = PromptKind::Synthesis.heading(),
        )
    }

    pub fn draft(topic: &str, synthesis: &str) -> String {
        format!(
            r#"{heading}

You are a professional writer producing a comprehensive answer from research findings.

Research topic: {topic}

## Research Synthesis

{synthesis}

## Requirements

1. An introduction that frames the topic
2. A body organized under headings and subheadings
3. Evidence-based statements attributed to their sources as [Source: URL]
4. Balanced treatment of differing perspectives
5. A conclusion summarizing the key insights

Write for a general audience, in Markdown."#,
            heading = PromptKind::Draft.heading(),
        )
    }

    pub fn draft_refinement(topic: &str, draft: &str) -> String {
        format!(
            r#"{heading}

You are an editor reviewing a draft answer.

Research topic: {topic}

## Draft

{draft}

## Instructions

Improve clarity, flow and explanations. Remove redundancy, fill obvious gaps and keep
every citation. Preserve the structure and Markdown formatting of the original.
Return only the improved document."#,
            heading = PromptKind::DraftRefinement.heading(),
        )
    }

    pub fn fact_check(topic: &str, synthesis: &str, draft: &str) -> String {
        format!(
            r#"{heading}

You are a fact-checker comparing a draft against the research it was written from.

Research topic: {topic}

## Research Synthesis

{synthesis}

## Draft To Verify

{draft}

## Instructions

List every inaccurate, unsupported, exaggerated or misattributed claim in the draft.
For each one give the claim, the kind of problem, and the correct information from the
synthesis. Ignore style and opinion. If nothing is wrong, say that the draft appears
factually accurate. Format the report in Markdown."#,
            heading = PromptKind::FactCheck.heading(),
        )
    }

    pub fn correction(topic: &str, draft: &str, report: &str) -> String {
        format!(
            r#"{heading}

You are an editor applying a fact-check report to a draft.

Research topic: {topic}

## Draft

{draft}

## Fact-Check Report

{report}

## Instructions

Correct every issue the report identifies, adding citations for new claims, while
keeping the original structure and style. If the report found no issues, return the
draft unchanged. Return only the corrected document."#,
            heading = PromptKind::Correction.heading(),
        )
    }

    pub fn citation_extraction(draft: &str) -> String {
        format!(
            r#"{heading}

You are a citation analyst.

## Document

{draft}

## Instructions

1. List every citation in the document with its exact text, URL and a short excerpt of
   the surrounding context
2. Separately list factual claims that need a citation but have none"#,
            heading = PromptKind::CitationExtraction.heading(),
        )
    }

    pub fn citation_formatting(
        topic: &str,
        draft: &str,
        analysis: &str,
        synthesis: &str,
        style: &str,
    ) -> String {
        format!(
            r#"{heading}

You are a citation editor standardizing the references of a research document.

Research topic: {topic}
Citation style: {style}

## Document

{draft}

## Citation Analysis

{analysis}

## Research Synthesis (for missing sources)

{synthesis}

## Instructions

1. Convert every citation to {style} format
2. Add citations for unsupported claims using sources from the synthesis
3. Replace inline URLs with in-text citations
4. Finish with a numbered "References" section listing every source

Return the complete revised document."#,
            heading = PromptKind::CitationFormatting.heading(),
        )
    }

    pub fn citation_validation(formatted: &str) -> String {
        format!(
            r#"{heading}

You are a citation validator.

## Document

{formatted}

## Instructions

Check that every URL in the References section is well formed, that every in-text
citation points at an existing reference, and that every cited source is listed.
Write a brief validation report describing any problem found. If there are none,
state that all citations appear properly formatted. Return only the report."#,
            heading = PromptKind::CitationValidation.heading(),
        )
    }

    pub fn citation_finalization(formatted: &str, report: &str) -> String {
        format!(
            r#"{heading}

You are a citation editor producing the final version of a document.

## Document

{formatted}

## Validation Report

{report}

## Instructions

Apply every correction the validation report calls for. If it found no issues, return
the document unchanged. Return only the final document."#,
            heading = PromptKind::CitationFinalization.heading(),
        )
    }

    pub fn final_improvement(topic: &str, document: &str) -> String {
        format!(
            r#"{heading}

You are a senior editor giving a research document its final polish.

Research topic: {topic}

## Document

{document}

## Instructions

1. Improve clarity, readability and logical flow
2. Tighten explanations and remove repetition
3. Keep every fact, citation and the References section intact

Return only the improved document in Markdown."#,
            heading = PromptKind::FinalImprovement.heading(),
        )
    }
}
