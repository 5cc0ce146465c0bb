use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use regex::Regex;

use crate::cli::GlobalArgs;

pub const DEFAULT_PANEL_LABELS: [&str; 4] = ["BM25", "Mistral", "GTE-Qwen2", "CLIP"];
pub const MIN_PANELS: usize = 2;
pub const MAX_PANELS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelSpec {
    pub key: String,
    pub label: String,
}

impl PanelSpec {
    pub fn numbered(position: usize, label: &str) -> Self {
        Self {
            key: format!("model_{position}_documents"),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub request_timeout: Duration,
    pub stagger_delay: Duration,
    pub notice_duration: Duration,
    pub panels: Vec<PanelSpec>,
    pub output_dir: PathBuf,
    pub viewport_width: u32,
}

pub const MAX_STAGGER_MS: u64 = 10_000;
pub const MAX_NOTICE_MS: u64 = 60_000;

impl ClientConfig {
    pub fn from_args(args: &GlobalArgs) -> Result<Self> {
        let server_url = normalize_server_url(&args.server_url)?;
        let panels = resolve_panels(&args.model_labels)?;

        if args.timeout_secs == 0 {
            bail!("request timeout must be at least one second");
        }
        if args.viewport_width == 0 {
            bail!("viewport width must be positive");
        }
        if args.stagger_ms > MAX_STAGGER_MS {
            bail!(
                "stagger delay must be at most {MAX_STAGGER_MS} ms, got {}",
                args.stagger_ms
            );
        }
        if args.notice_ms > MAX_NOTICE_MS {
            bail!(
                "notice duration must be at most {MAX_NOTICE_MS} ms, got {}",
                args.notice_ms
            );
        }

        Ok(Self {
            server_url,
            request_timeout: Duration::from_secs(args.timeout_secs),
            stagger_delay: Duration::from_millis(args.stagger_ms),
            notice_duration: Duration::from_millis(args.notice_ms),
            panels,
            output_dir: args.output_dir.clone(),
            viewport_width: args.viewport_width,
        })
    }

    pub fn panel_label(&self, key: &str) -> Option<&str> {
        self.panels
            .iter()
            .find(|panel| panel.key == key)
            .map(|panel| panel.label.as_str())
    }
}

fn normalize_server_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let pattern = Regex::new(r"^https?://[^\s/]+(/[^\s]*)?$")
        .context("failed to compile server url regex")?;
    if !pattern.is_match(trimmed) {
        bail!("server url must be an http(s) base url, got {raw:?}");
    }
    Ok(trimmed.to_string())
}

fn resolve_panels(raw_labels: &[String]) -> Result<Vec<PanelSpec>> {
    let labels = raw_labels
        .iter()
        .map(|label| label.trim().to_string())
        .filter(|label| !label.is_empty())
        .collect::<Vec<String>>();

    let labels = if labels.is_empty() {
        DEFAULT_PANEL_LABELS
            .iter()
            .map(|label| label.to_string())
            .collect::<Vec<String>>()
    } else {
        labels
    };

    if !(MIN_PANELS..=MAX_PANELS).contains(&labels.len()) {
        bail!(
            "expected between {MIN_PANELS} and {MAX_PANELS} retrieval models, got {}",
            labels.len()
        );
    }

    Ok(labels
        .iter()
        .enumerate()
        .map(|(idx, label)| PanelSpec::numbered(idx + 1, label))
        .collect())
}

#[cfg(test)]
pub(crate) fn test_config(server_url: &str, output_dir: PathBuf) -> ClientConfig {
    ClientConfig {
        server_url: server_url.trim_end_matches('/').to_string(),
        request_timeout: Duration::from_secs(5),
        stagger_delay: Duration::from_millis(400),
        notice_duration: Duration::from_millis(3000),
        panels: resolve_panels(&[]).expect("default panels are valid"),
        output_dir,
        viewport_width: 1600,
    }
}
