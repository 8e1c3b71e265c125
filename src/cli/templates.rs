use anyhow::Result;
use clap::Args;
use serde::Serialize;
use soulbrowser_templates::Template;

use crate::cli::context::CliContext;
use crate::cli::output::emit;

#[derive(Args, Clone, Debug)]
pub struct NameArgs {
    /// Template name
    pub name: String,
}

/// One row of `livecall list`.
#[derive(Debug, Serialize)]
struct TemplateRow {
    name: String,
    status: String,
    method: String,
    host: String,
    parameters: Vec<String>,
    successes: u64,
    failures: u64,
    last_used_at: Option<String>,
}

impl From<&Template> for TemplateRow {
    fn from(template: &Template) -> Self {
        Self {
            name: template.name.clone(),
            status: template.status.to_string(),
            method: template.method.clone(),
            host: template.host().unwrap_or_default(),
            parameters: template.parameters.iter().map(|p| p.name.clone()).collect(),
            successes: template.usage.success_count,
            failures: template.usage.failure_count,
            last_used_at: template.usage.last_used_at.map(|at| at.to_rfc3339()),
        }
    }
}

pub async fn cmd_list(ctx: &CliContext) -> Result<()> {
    let engine = ctx.engine().await?;
    let rows: Vec<TemplateRow> = engine.list().await?.iter().map(TemplateRow::from).collect();
    emit(ctx.output(), &rows, |rows| {
        if rows.is_empty() {
            println!("No templates stored in {}", ctx.config().store_dir.display());
            return;
        }
        for row in rows {
            println!(
                "{:<32} {:<10} {:<6} {:<28} ok={} fail={} params=[{}]",
                row.name,
                row.status,
                row.method,
                row.host,
                row.successes,
                row.failures,
                row.parameters.join(", ")
            );
        }
    })
}

pub async fn cmd_show(args: NameArgs, ctx: &CliContext) -> Result<()> {
    let engine = ctx.engine().await?;
    let template = engine.get(&args.name).await?;
    emit(ctx.output(), &template, |template| {
        println!("Template: {}", template.name);
        println!("Task: {}", template.task);
        println!("Status: {} (revision {})", template.status, template.revision);
        println!("Request: {} {}", template.method, template.url_template);
        println!("Response: {:?}", template.response_type);
        if let Some(extraction) = &template.extraction {
            println!("Extraction: {extraction}");
        }
        if template.allowed_domains.is_empty() {
            println!("Allowed domains: any");
        } else {
            println!("Allowed domains: {}", template.allowed_domains.join(", "));
        }
        for param in &template.parameters {
            println!(
                "- {} ({:?}, {:?}{})",
                param.name,
                param.param_type,
                param.source,
                if param.required { ", required" } else { "" }
            );
        }
        println!(
            "Usage: {} ok / {} failed, last similarity {}",
            template.usage.success_count,
            template.usage.failure_count,
            template
                .usage
                .last_similarity
                .map(|s| format!("{s:.2}"))
                .unwrap_or_else(|| "n/a".into())
        );
    })
}

pub async fn cmd_delete(args: NameArgs, ctx: &CliContext) -> Result<()> {
    let engine = ctx.engine().await?;
    engine.delete(&args.name).await?;
    println!("Deleted template {}", args.name);
    Ok(())
}
