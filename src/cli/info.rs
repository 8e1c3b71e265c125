use anyhow::Result;

use crate::cli::context::CliContext;
use soulbrowser_templates::LifecycleStatus;

pub async fn cmd_info(ctx: &CliContext) -> Result<()> {
    let config = ctx.config();

    println!("livecall System Information");
    println!("==========================");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Build Date: {}", env!("BUILD_DATE", "unknown"));
    println!("Git Commit: {}", env!("GIT_HASH", "unknown"));
    println!("Git Branch: {}", env!("GIT_BRANCH", "unknown"));
    println!();

    println!("Configuration:");
    println!("- Config File: {}", ctx.config_path().display());
    println!("- Template Store: {}", config.store_dir.display());
    println!("- Replay Timeout: {} ms", config.replay.timeout_ms);
    println!("- Max Response: {} bytes", config.replay.max_response_bytes);
    println!("- Ranker Top-K: {}", config.ranker.top_k);
    println!(
        "- Lifecycle: verify after {}, deprecate after {}, drift below {:.2}",
        config.lifecycle.verify_after_successes,
        config.lifecycle.deprecate_after_failures,
        config.lifecycle.drift_threshold
    );
    println!();

    match ctx.engine().await {
        Ok(engine) => {
            let templates = engine.list().await?;
            let count = |status: LifecycleStatus| {
                templates.iter().filter(|t| t.status == status).count()
            };
            println!("Templates:");
            println!("- Total: {}", templates.len());
            println!("- Draft: {}", count(LifecycleStatus::Draft));
            println!("- Verified: {}", count(LifecycleStatus::Verified));
            println!("- Deprecated: {}", count(LifecycleStatus::Deprecated));
        }
        Err(err) => println!("Templates: unavailable ({err:#})"),
    }

    Ok(())
}
