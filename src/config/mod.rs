use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::policy::PolicyRule;

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub ui: UiSettings,
    pub scan: ScanSettings,
    pub images: ImageSettings,
    pub aws: AwsSettings,
    pub kubernetes: KubernetesSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<PolicyRule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UiSettings {
    pub color: bool,
    pub max_table_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSettings {
    pub default_days: u64,
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageSettings {
    /// Glob patterns for image references that must never be removed.
    pub keep_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AwsSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KubernetesSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            ui: UiSettings {
                color: true,
                max_table_rows: 20,
            },
            scan: ScanSettings {
                default_days: 30,
                concurrency: 4,
            },
            images: ImageSettings {
                keep_tags: vec![
                    "*latest*".to_string(),
                    "*stable*".to_string(),
                    "*production*".to_string(),
                ],
            },
            aws: AwsSettings { region: None },
            kubernetes: KubernetesSettings { namespace: None },
            rules: None,
            config_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    ui: Option<RawUiSettings>,
    scan: Option<RawScanSettings>,
    images: Option<RawImageSettings>,
    aws: Option<RawAwsSettings>,
    kubernetes: Option<RawKubernetesSettings>,
    rules: Option<Vec<PolicyRule>>,
}

#[derive(Debug, Deserialize)]
struct RawUiSettings {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawScanSettings {
    default_days: Option<u64>,
    concurrency: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawImageSettings {
    keep_tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawAwsSettings {
    region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawKubernetesSettings {
    namespace: Option<String>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/opsweep/config.toml")
}

/// Precedence, lowest to highest: built-in defaults, config file, OPSWEEP_*
/// environment variables. CLI flags are applied by the caller on top.
pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&s).context("failed to parse config file (TOML)")?;
        apply_raw_config(&mut cfg, raw);
        cfg.config_path = Some(path.display().to_string());
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }

    if let Some(scan) = raw.scan {
        if let Some(default_days) = scan.default_days {
            cfg.scan.default_days = default_days;
        }
        if let Some(concurrency) = scan.concurrency {
            cfg.scan.concurrency = concurrency.max(1);
        }
    }

    if let Some(images) = raw.images {
        if let Some(keep_tags) = images.keep_tags {
            cfg.images.keep_tags = keep_tags;
        }
    }

    if let Some(aws) = raw.aws {
        if let Some(region) = aws.region {
            cfg.aws.region = Some(region);
        }
    }

    if let Some(kubernetes) = raw.kubernetes {
        if let Some(namespace) = kubernetes.namespace {
            cfg.kubernetes.namespace = Some(namespace);
        }
    }

    if let Some(rules) = raw.rules {
        cfg.rules = Some(rules);
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("OPSWEEP_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).with_context(|| "OPSWEEP_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("OPSWEEP_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .with_context(|| "OPSWEEP_UI_MAX_TABLE_ROWS")?;
    }
    if let Ok(v) = std::env::var("OPSWEEP_SCAN_DEFAULT_DAYS") {
        cfg.scan.default_days = v
            .trim()
            .parse::<u64>()
            .with_context(|| "OPSWEEP_SCAN_DEFAULT_DAYS")?;
    }
    if let Ok(v) = std::env::var("OPSWEEP_SCAN_CONCURRENCY") {
        cfg.scan.concurrency = v
            .trim()
            .parse::<usize>()
            .with_context(|| "OPSWEEP_SCAN_CONCURRENCY")?
            .max(1);
    }
    if let Ok(v) = std::env::var("OPSWEEP_IMAGES_KEEP_TAGS") {
        let parts: Vec<String> = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        if !parts.is_empty() {
            cfg.images.keep_tags = parts;
        }
    }
    if let Ok(v) = std::env::var("OPSWEEP_AWS_REGION") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.aws.region = Some(v.to_string());
        }
    }
    if let Ok(v) = std::env::var("OPSWEEP_KUBERNETES_NAMESPACE") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.kubernetes.namespace = Some(v.to_string());
        }
    }

    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!(
            "invalid boolean: {s} (expected true|false|1|0|yes|no|on|off)"
        )),
    }
}
