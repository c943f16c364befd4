//! Processed-text export.
//!
//! ```bash
//! gl export 550e8400-e29b-41d4-a716-446655440000 --out-dir ./exports
//! ```
//!
//! Writes the parsed text of a submission to
//! `<out-dir>/<category>/<first two slug letters>/<slug>.txt`, where the
//! slug is the lowercased title without a leading article, spaces turned
//! into underscores and anything but letters, digits and `_` dropped.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;
use uuid::Uuid;

use guardlight_core::models::Submission;
use guardlight_core::store::SubmissionStore;

use crate::config::Config;
use crate::engine::Engine;

/// CLI entry point for `gl export <id> --out-dir <dir>`.
pub async fn run_export(config: &Config, id: Uuid, out_dir: &Path) -> Result<()> {
    let engine = Engine::open(config).await?;
    let result = engine.store.get_submission(id).await;
    engine.close().await;

    let Some(sub) = result? else {
        bail!("submission not found: {}", id);
    };
    let path = export_submission(&sub, out_dir)?;
    println!("Exported: {}", path.display());
    Ok(())
}

/// Write the processed text of `sub` under `out_dir` and return the file path.
pub fn export_submission(sub: &Submission, out_dir: &Path) -> Result<PathBuf> {
    let Some(text) = sub.raw.processed_text.as_deref() else {
        bail!("submission {} has no processed text yet", sub.id);
    };
    let path = export_path(out_dir, &sub.category, &sub.title);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(submission_id = %sub.id, path = %path.display(), "processed text exported");
    Ok(path)
}

fn export_path(out_dir: &Path, category: &str, title: &str) -> PathBuf {
    let slug = slug(strip_leading_article(title));
    let letters: String = slug.chars().take(2).collect();

    let mut path = out_dir.to_path_buf();
    let category = category.trim().to_lowercase().replace(' ', "_");
    if !category.is_empty() {
        path.push(category);
    }
    path.push(letters);
    path.push(format!("{slug}.txt"));
    path
}

fn strip_leading_article(title: &str) -> String {
    let title = title.trim().to_lowercase();
    for article in ["the ", "a ", "an "] {
        if let Some(rest) = title.strip_prefix(article) {
            return rest.to_string();
        }
    }
    title
}

/// At least two characters, padded with `z`.
fn slug(title: String) -> String {
    let mut slug: String = title
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    while slug.chars().count() < 2 {
        slug.push('z');
    }
    slug
}
