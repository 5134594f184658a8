//! # deep-research
//!
//! Command-line front end for the research pipeline.
//!
//! ## Quick Start
//! ```bash
//! export TAVILY_API_KEY=tvly-...
//! cargo run -- "solar panel efficiency" --queries 3 --output result.json
//! ```

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use deep_research::{Config, LlmProvider, Pipeline, RunRequest, RunResult, SearchDepth};

// =============================================================================
// CLI ARGUMENTS
// =============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "deep-research",
    version,
    about = "Research a topic: search, draft, fact-check, cite and polish",
    long_about = r#"
deep-research runs a five-stage pipeline over a topic:

  1. research    generate search queries, search with Tavily, synthesize
  2. draft       write a structured draft (plus an optional refinement pass)
  3. fact_check  verify the draft against the research and correct it
  4. citation    standardize citations and validate the references
  5. improve     final editorial polish

Each stage retries transient model failures and falls back to the next
configured model. A stage that still fails stops the run; whatever was
produced so far is still printed and written to --output.

PREREQUISITES:
  TAVILY_API_KEY must be set (environment or .env file)
  Ollama: ollama serve && ollama pull llama3.2
  Gemini: GEMINI_API_KEY (or GOOGLE_API_KEY) must be set

EXAMPLES:
  deep-research "solar panel efficiency"
  deep-research --depth advanced --queries 5 "perovskite solar cells"
  deep-research --provider gemini --model gemini-2.0-flash,gemini-1.5-flash "grid storage"
  deep-research --output run.json --markdown report.md "heat pumps"
"#
)]
struct Args {
    /// The topic to research (asked for interactively when omitted)
    #[arg(value_name = "TOPIC")]
    topic: Option<String>,

    /// Search depth passed to the search API
    #[arg(short = 'd', long, value_enum, default_value_t = SearchDepth::Basic)]
    depth: SearchDepth,

    /// Number of search queries to generate
    #[arg(short = 'n', long = "queries", default_value_t = 3)]
    queries: usize,

    /// LLM provider (overrides LLM_PROVIDER)
    #[arg(short = 'p', long, value_enum)]
    provider: Option<LlmProvider>,

    /// Models to try in order; repeat or comma-separate (overrides LLM_MODELS)
    #[arg(short = 'm', long = "model", value_delimiter = ',')]
    models: Vec<String>,

    /// Abort the run after this many seconds (overrides RUN_TIMEOUT_SECS)
    #[arg(short = 't', long = "timeout", value_name = "SECS")]
    timeout: Option<u64>,

    /// Skip the draft refinement pass
    #[arg(long)]
    no_refine: bool,

    /// Write the full run result as JSON
    #[arg(short = 'o', long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Write the best available document as Markdown
    #[arg(long, value_name = "PATH")]
    markdown: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Args {
    fn request(&self, topic: String) -> RunRequest {
        RunRequest::new(topic)
            .with_depth(self.depth)
            .with_queries(self.queries)
    }

    /// Apply command-line overrides on top of the environment configuration.
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(provider) = self.provider {
            if provider != config.provider {
                config.provider = provider;
                config.models = provider.default_models();
                config.stage_models = provider.default_stage_models();
            }
        }
        if !self.models.is_empty() {
            // An explicit model list is authoritative for every stage
            config.models = self.models.iter().map(|m| m.trim().to_string()).collect();
            config.stage_models.clear();
        }
        if let Some(secs) = self.timeout {
            config.run_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if self.no_refine {
            config.refine_draft = false;
        }
    }
}

// =============================================================================
// MAIN FUNCTION
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose)?;

    let mut config = Config::from_env().context("failed to load configuration")?;
    args.apply_overrides(&mut config);

    info!(
        provider = %config.provider,
        models = ?config.models,
        refine_draft = config.refine_draft,
        "Configuration loaded"
    );

    let topic = match &args.topic {
        Some(topic) => topic.clone(),
        None => prompt_for_topic(std::io::stdin().lock(), std::io::stdout())?,
    };

    let pipeline = Pipeline::from_config(config).context("invalid configuration")?;
    let result = pipeline.run(args.request(topic)).await;

    write_outputs(&result, args.output.as_deref(), args.markdown.as_deref())?;
    print_result(&result);

    if !result.is_success() {
        let reason = result.error.clone().unwrap_or_else(|| "unknown error".to_string());
        error!(error = %reason, "Research failed");

        if reason.contains("connection") {
            eprintln!("\nTip: make sure Ollama is running: ollama serve");
        } else if reason.contains("not found") {
            eprintln!("\nTip: make sure the model is installed: ollama pull llama3.2");
        }

        anyhow::bail!("research failed: {reason}");
    }

    info!("Research completed successfully");
    Ok(())
}

/// Ask for a topic on the terminal when none was given on the command line.
fn prompt_for_topic(mut input: impl BufRead, mut output: impl Write) -> Result<String> {
    write!(output, "Enter research topic: ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line).context("failed to read topic")?;

    let topic = line.trim();
    if topic.is_empty() {
        anyhow::bail!("no research topic given");
    }
    Ok(topic.to_string())
}

fn print_result(result: &RunResult) {
    println!("\n{}", "=".repeat(60));
    println!("RESEARCH RESULTS: {}", result.topic);
    println!("{}", "=".repeat(60));

    let stages: Vec<_> = result.completed_stages.iter().map(|s| s.as_str()).collect();
    println!("Status: {}", result.status);
    println!("Completed stages: {}", stages.join(", "));
    if let Some(source) = result.document_source {
        println!("Document: {source}");
    }
    println!();

    if result.best_available_document.is_empty() {
        println!("(no document produced)");
    } else {
        println!("{}", result.best_available_document);
    }

    let urls = result.source_urls();
    if !urls.is_empty() {
        println!("\nSources:");
        for url in urls {
            println!("  - {url}");
        }
    }
    println!("\n{}", "=".repeat(60));
}

fn write_outputs(result: &RunResult, json: Option<&Path>, markdown: Option<&Path>) -> Result<()> {
    if let Some(path) = json {
        let body = serde_json::to_string_pretty(result).context("failed to serialize run result")?;
        std::fs::write(path, body)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Run result written");
    }

    if let Some(path) = markdown {
        std::fs::write(path, &result.best_available_document)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "Document written");
    }

    Ok(())
}

// =============================================================================
// LOGGING INITIALIZATION
// =============================================================================

/// `RUST_LOG` wins when set; otherwise `-v` selects debug for this crate.
fn init_logging(verbose: bool) -> Result<()> {
    let default_directive = if verbose {
        "deep_research=debug,info"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
