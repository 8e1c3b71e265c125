use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use network_tap_light::CallRanker;
use soulbrowser_templates::ChooserRequest;

use crate::cli::context::CliContext;
use crate::cli::output::emit;
use crate::cli::trace::{load_trace, FileChooser};

#[derive(Args, Clone, Debug)]
pub struct RankArgs {
    /// Trace file (JSON or YAML)
    #[arg(long, value_name = "FILE")]
    pub trace: PathBuf,

    /// Task the trace was captured for
    #[arg(long)]
    pub task: String,

    /// URL of the page the task ran on
    #[arg(long)]
    pub page_url: Option<String>,
}

#[derive(Args, Clone, Debug)]
pub struct LearnArgs {
    #[command(flatten)]
    pub source: RankArgs,

    /// Chooser decision file (JSON or YAML)
    #[arg(long, value_name = "FILE")]
    pub decision: PathBuf,
}

/// Prints what a chooser would be shown for this trace.
pub async fn cmd_rank(args: RankArgs, ctx: &CliContext) -> Result<()> {
    let trace = load_trace(&args.trace, args.page_url).await?;
    let ranker_config = &ctx.config().ranker;
    let candidates = CallRanker::new(ranker_config.clone()).rank(
        &trace.calls,
        &trace.page,
        &args.task,
        ranker_config.top_k,
    );
    let request = ChooserRequest::new(
        args.task,
        trace.page.url.clone(),
        &candidates,
        ranker_config.snippet_chars,
    );
    emit(ctx.output(), &request, |request| {
        if request.candidates.is_empty() {
            println!("No replayable calls in {}", args.trace.display());
            return;
        }
        for summary in &request.candidates {
            println!(
                "[{}] {:>6.2}  {} {} -> {} {}",
                summary.index,
                summary.score,
                summary.method,
                summary.url,
                summary.status,
                summary.content_type.as_deref().unwrap_or("-")
            );
            println!("      {}", summary.reasons.join("; "));
        }
    })
}

pub async fn cmd_learn(args: LearnArgs, ctx: &CliContext) -> Result<()> {
    let trace = load_trace(&args.source.trace, args.source.page_url).await?;
    let chooser = FileChooser::load(&args.decision).await?;
    let engine = ctx.engine().await?;
    let learned = engine
        .learn(&trace.calls, &trace.page, &args.source.task, &chooser)
        .await?;
    emit(ctx.output(), &learned, |learned| match learned {
        Some(template) => println!(
            "Learned template {} ({} {}), status {}",
            template.name, template.method, template.url_template, template.status
        ),
        None => println!("No template learned: the trace had no usable candidate"),
    })
}
