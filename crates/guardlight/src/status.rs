//! Submission results.
//!
//! ```bash
//! # One submission with every analysis grouped by theme
//! gl status 550e8400-e29b-41d4-a716-446655440000
//!
//! # All submissions of an owner, newest first, as JSON
//! gl results --owner 7c9e6679-7425-40de-944b-e07fc1f90ae7
//! ```

use anyhow::{bail, Result};
use uuid::Uuid;

use guardlight_core::results::{results_for_owner, view_submission, SubmissionView};
use guardlight_core::store::SubmissionStore;

use crate::config::Config;
use crate::engine::Engine;

pub async fn get_submission_view(config: &Config, id: Uuid) -> Result<SubmissionView> {
    let engine = Engine::open(config).await?;
    let result = engine.store.get_submission(id).await;
    let adapters = engine.adapters.clone();
    engine.close().await;

    match result? {
        Some(sub) => Ok(view_submission(&sub, &adapters)),
        None => bail!("submission not found: {}", id),
    }
}

/// CLI entry point for `gl status <id>`.
pub async fn run_status(config: &Config, id: Uuid) -> Result<()> {
    let view = get_submission_view(config, id).await?;

    println!("--- Submission ---");
    println!("id:           {}", view.id);
    println!("title:        {}", view.title);
    println!("content_type: {}", view.content_type);
    if !view.category.is_empty() {
        println!("category:     {}", view.category);
    }
    println!("created_at:   {}", view.created_at.to_rfc3339());
    println!();

    for theme in &view.themes {
        println!("--- Theme {} ---", theme.theme_id);
        for analyzer in &theme.analyzers {
            println!("[{}] {}", analyzer.key, analyzer.name);
            println!("  status:    {}", analyzer.status);
            println!("  score:     {:.3}", analyzer.score);
            println!(
                "  fragments: {}/{}",
                analyzer.fragments_done, analyzer.fragments_total
            );
            if let Some(report) = analyzer.report {
                println!("  report:    {}", report);
            }
            for input in &analyzer.inputs {
                println!("  {}: {}", input.name, input.value);
            }
            for line in &analyzer.content {
                println!("  > {}", line);
            }
        }
        println!();
    }
    Ok(())
}

/// CLI entry point for `gl results --owner <uuid>`.
pub async fn run_results(config: &Config, owner_id: Uuid) -> Result<()> {
    let engine = Engine::open(config).await?;
    let views = results_for_owner(engine.store.as_ref(), &engine.adapters, owner_id).await;
    engine.close().await;
    println!("{}", serde_json::to_string_pretty(&views?)?);
    Ok(())
}
