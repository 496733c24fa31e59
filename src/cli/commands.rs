//! CLI command implementations
//!
//! Both commands are thin: `run` drives a [`QueryPipeline`] over an
//! in-memory container built from a fixture, `resolve` runs the
//! continuation resolver on stdin input. Neither keeps state between runs;
//! resuming a run means passing back the continuation it printed.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::cancellation::CancellationToken;
use crate::container::ContainerFixture;
use crate::continuation::{resolve as resolve_tokens, ParallelContinuationToken};
use crate::pipeline::QueryPipeline;
use crate::routing::FeedRange;

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::{read_request, write_line, write_response};

/// Input of `crossquery resolve`
#[derive(Debug, Deserialize)]
struct ResolveRequest {
    ranges: Vec<FeedRange>,
    tokens: Vec<ParallelContinuationToken>,
}

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Run {
            fixture,
            max_item_count,
            continuation,
            pages,
        } => {
            let mut fixture = load_fixture(&fixture)?;
            if let Some(n) = max_item_count {
                fixture.options.max_item_count = n;
            }
            if continuation.is_some() {
                fixture.options.continuation = continuation;
            }

            let rt = tokio::runtime::Runtime::new().map_err(|e| {
                CliError::runtime_error(format!("Failed to create tokio runtime: {}", e))
            })?;
            let summary = rt.block_on(run_fixture(&fixture, pages, |line| write_line(&line)))?;
            write_response(summary)
        }
        Command::Resolve => resolve(),
    }
}

fn load_fixture(path: &Path) -> CliResult<ContainerFixture> {
    let content = fs::read_to_string(path)
        .map_err(|e| CliError::fixture_error(format!("Failed to read fixture: {}", e)))?;
    serde_json::from_str(&content)
        .map_err(|e| CliError::fixture_error(format!("Invalid fixture JSON: {}", e)))
}

/// Run a fixture's query, handing each page to `emit`
///
/// Returns a summary with the page count, the continuation to resume from
/// (`null` once the query is drained) and the query metrics. A page's own
/// continuation can still point at ranges not read yet even when they turn
/// out to be empty.
pub async fn run_fixture<F>(
    fixture: &ContainerFixture,
    max_pages: Option<usize>,
    mut emit: F,
) -> CliResult<Value>
where
    F: FnMut(Value) -> CliResult<()>,
{
    let container = fixture.build()?;
    let context = container.pipeline_context(fixture.query.clone(), fixture.options.clone());
    let mut pipeline = QueryPipeline::create(context).await?;
    let cancel = CancellationToken::new();

    let mut pages = 0usize;
    let mut documents = 0usize;
    let mut last_continuation = None;
    while max_pages.map_or(true, |max| pages < max) {
        let Some(page) = pipeline.next_page(&cancel).await else {
            last_continuation = None;
            break;
        };
        let page = page?;
        let continuation = page.continuation_token()?;
        let count = page.documents.len();
        emit(json!({
            "page": pages,
            "documents": page.documents,
            "requestCharge": page.request_charge,
            "continuation": continuation,
        }))?;
        pages += 1;
        documents += count;
        last_continuation = continuation;
    }

    Ok(json!({
        "pages": pages,
        "documents": documents,
        "continuation": last_continuation,
        "metrics": serde_json::to_value(pipeline.metrics())?,
    }))
}

/// Read `{ranges, tokens}` from stdin and print the mapping
pub fn resolve() -> CliResult<()> {
    let request = read_request()?;
    write_response(resolve_mapping(request)?)
}

/// Resolve a `{ranges, tokens}` document
pub fn resolve_mapping(request: Value) -> CliResult<Value> {
    let request: ResolveRequest = serde_json::from_value(request)?;
    let mapping = resolve_tokens(&request.ranges, &request.tokens)?;

    let section = |entries: &BTreeMap<FeedRange, Option<ParallelContinuationToken>>| -> Vec<Value> {
        entries
            .iter()
            .map(|(range, token)| {
                json!({
                    "range": range,
                    "token": token.as_ref().and_then(|t| t.token.clone()),
                })
            })
            .collect()
    };

    Ok(json!({
        "left": section(&mapping.left),
        "target": section(&mapping.target),
        "right": section(&mapping.right),
        "targetSpan": mapping.target_span(),
    }))
}
