//! Watched certificate paths (`cert_paths`).

use tracing::info;

use crate::config::{PluginConfig, SharedConfig};

/// Validate `candidate` and append it to the shared `cert_paths`.
///
/// Rejections are ordinary result lines, not errors. Checks run in order and
/// the first failing one wins: blank, already tracked, missing on disk. The
/// filesystem is probed before the config lock is taken.
pub async fn add_path(config: &SharedConfig, candidate: &str) -> Vec<String> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return vec![EMPTY.to_string()];
    }

    // Existence is checked once, here; entries are never revalidated.
    let exists = tokio::fs::try_exists(candidate).await.unwrap_or(false);
    config
        .update(|cfg| add_checked(cfg, candidate, exists))
        .await
}

const EMPTY: &str = "certificate can not be empty.";

/// The validation and append step, given whether `candidate` exists on disk.
pub fn add_checked(cfg: &mut PluginConfig, candidate: &str, exists: bool) -> Vec<String> {
    let candidate = candidate.trim();

    if candidate.is_empty() {
        return vec![EMPTY.to_string()];
    }
    if cfg.cert_paths.iter().any(|p| p == candidate) {
        return vec![format!("'{candidate}' is already in cert_paths")];
    }
    if !exists {
        return vec![format!("Could not find path: '{candidate}'")];
    }

    cfg.cert_paths.push(candidate.to_string());
    info!(path = candidate, total = cfg.cert_paths.len(), "added cert path");

    vec![
        format!("Added new cert path: '{candidate}'"),
        format!("cert_paths: {}", render_paths(&cfg.cert_paths)),
    ]
}

fn render_paths(paths: &[String]) -> String {
    let quoted = paths
        .iter()
        .map(|p| format!("'{p}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{quoted}]")
}
