//! Stored themes, used by `themeIds` submissions.

use std::path::Path;

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use guardlight_core::models::Theme;
use guardlight_core::store::ThemeSource;

use crate::config::Config;
use crate::engine::Engine;

/// CLI entry point for `gl theme add <file> --owner <uuid>`.
pub async fn run_theme_add(config: &Config, path: &Path, owner_id: Uuid) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read theme file: {}", path.display()))?;
    let theme: Theme = serde_json::from_str(&raw).with_context(|| "Failed to parse theme")?;

    let registry = config.adapter_registry();
    if let Some(key) = &theme.reporter_key {
        if registry.reporter(key).is_none() {
            bail!("theme '{}': unknown reporter '{}'", theme.title, key);
        }
    }
    for analyzer in &theme.analyzers {
        if registry.analyzer(&analyzer.key).is_none() {
            bail!("theme '{}': unknown analyzer '{}'", theme.title, analyzer.key);
        }
    }

    let engine = Engine::open(config).await?;
    let result = engine.store.put_theme(owner_id, &theme).await;
    engine.close().await;
    result?;
    println!("Theme stored: {}", theme.id);
    Ok(())
}

/// CLI entry point for `gl theme list --owner <uuid>`.
pub async fn run_theme_list(config: &Config, owner_id: Uuid) -> Result<()> {
    let engine = Engine::open(config).await?;
    let themes = engine.store.themes_for_owner(owner_id).await;
    engine.close().await;

    let themes = themes?;
    if themes.is_empty() {
        println!("No themes.");
        return Ok(());
    }
    println!("{:<36}  {:<24} {:<12} ANALYZERS", "THEME", "TITLE", "REPORTER");
    for theme in &themes {
        let analyzers: Vec<&str> = theme
            .analyzers
            .iter()
            .filter(|a| a.change.is_active())
            .map(|a| a.key.as_str())
            .collect();
        println!(
            "{:<36}  {:<24} {:<12} {}",
            theme.id,
            theme.title,
            theme.reporter_key.as_deref().unwrap_or("-"),
            analyzers.join(",")
        );
    }
    Ok(())
}
