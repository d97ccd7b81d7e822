//! Runtime configuration.
//!
//! Loaded from `armitage.toml` (or `$ARMITAGE_CONFIG_PATH`) with
//! environment-variable overrides on top. Precedence: env vars > config
//! file > defaults. A missing file simply yields the defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Perception payload strategy and sub-phase switches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    /// Keep the raw b64 capture on the snapshot. Off by default; the
    /// hash-only strategy requires the vision parser to resolve frames
    /// by `image_hash`.
    pub store_screenshot_b64: bool,
    /// Attach a UIA tree when the alias is available.
    pub prefer_uia_tree: bool,
    /// Run the vision parse (also gated per-cycle by the `need_vision`
    /// hint).
    pub vision_parse: bool,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            store_screenshot_b64: false,
            prefer_uia_tree: true,
            vision_parse: true,
        }
    }
}

/// Action execution switches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Capture a hash after every action and record it as the action's
    /// effect fingerprint.
    pub post_action_capture: bool,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            post_action_capture: true,
        }
    }
}

/// Workflow driver limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Upper bound on node transitions per run. Exceeding it terminates
    /// the run with `STEP_LIMIT` instead of looping forever.
    pub max_transitions: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_transitions: 256,
        }
    }
}

/// Recovery budget defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total recovery attempts per run, applied to fresh states.
    pub total_budget: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { total_budget: 8 }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// `[perception]` section.
    pub perception: PerceptionConfig,
    /// `[action]` section.
    pub action: ActionConfig,
    /// `[run]` section.
    pub run: RunConfig,
    /// `[retry]` section.
    pub retry: RetryConfig,
}

impl CoreConfig {
    /// Load configuration with precedence env vars > TOML file >
    /// defaults.
    ///
    /// # Errors
    ///
    /// Fails when the config file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_path(&Self::config_path_with(|key| {
            std::env::var(key).ok()
        }))?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from a specific TOML file, no env overrides. A missing file
    /// yields the defaults.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or parsed.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                toml::from_str(&contents).context("failed to parse config TOML")
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config file path: `$ARMITAGE_CONFIG_PATH`, else
    /// `./armitage.toml`. The resolver is injected for testability.
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("ARMITAGE_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("armitage.toml"))
    }

    /// Apply environment-variable overrides via an injected resolver.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ARMITAGE_STORE_SCREENSHOT_B64").and_then(parse_bool) {
            self.perception.store_screenshot_b64 = v;
        }
        if let Some(v) = env("ARMITAGE_PREFER_UIA_TREE").and_then(parse_bool) {
            self.perception.prefer_uia_tree = v;
        }
        if let Some(v) = env("ARMITAGE_VISION_PARSE").and_then(parse_bool) {
            self.perception.vision_parse = v;
        }
        if let Some(v) = env("ARMITAGE_POST_ACTION_CAPTURE").and_then(parse_bool) {
            self.action.post_action_capture = v;
        }
        if let Some(v) = env("ARMITAGE_MAX_TRANSITIONS").and_then(|s| s.parse().ok()) {
            self.run.max_transitions = v;
        }
        if let Some(v) = env("ARMITAGE_TOTAL_RETRY_BUDGET").and_then(|s| s.parse().ok()) {
            self.retry.total_budget = v;
        }
    }
}

fn parse_bool(value: String) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
