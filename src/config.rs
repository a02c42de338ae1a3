use std::fs;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::purchase::{LifecycleWindows, WorkerConfig};

/// Sellers always get at least this long to answer a dispute
const MIN_ESCALATION_DAYS: i64 = 3;
/// Upper bound for both lifecycle windows
const MAX_WINDOW_DAYS: i64 = 365;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL; the in-memory store is used when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub collaborators: CollaboratorConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Purchase lifecycle timing
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LifecycleConfig {
    pub auto_confirm_days: i64,
    pub escalation_days: i64,
    pub reconcile_interval_secs: u64,
    pub batch_size: usize,
    pub concurrency: usize,
    pub effect_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            auto_confirm_days: 7,
            escalation_days: 3,
            reconcile_interval_secs: 3600,
            batch_size: 100,
            concurrency: 1,
            effect_timeout_ms: 5000,
        }
    }
}

impl LifecycleConfig {
    pub fn windows(&self) -> LifecycleWindows {
        LifecycleWindows {
            auto_confirm: chrono::Duration::days(self.auto_confirm_days),
            escalation: chrono::Duration::days(self.escalation_days),
        }
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            interval: Duration::from_secs(self.reconcile_interval_secs),
            batch_size: self.batch_size,
            concurrency: self.concurrency,
        }
    }

    pub fn effect_timeout(&self) -> Duration {
        Duration::from_millis(self.effect_timeout_ms)
    }
}

/// Outbound collaborator endpoints; logging-only stand-ins when unset
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct CollaboratorConfig {
    #[serde(default)]
    pub settlement_url: Option<String>,
    #[serde(default)]
    pub asset_url: Option<String>,
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let lc = &self.lifecycle;
        anyhow::ensure!(
            (1..=MAX_WINDOW_DAYS).contains(&lc.auto_confirm_days),
            "lifecycle.auto_confirm_days must be between 1 and {}, got {}",
            MAX_WINDOW_DAYS,
            lc.auto_confirm_days
        );
        anyhow::ensure!(
            (MIN_ESCALATION_DAYS..=MAX_WINDOW_DAYS).contains(&lc.escalation_days),
            "lifecycle.escalation_days must be between {} and {}, got {}",
            MIN_ESCALATION_DAYS,
            MAX_WINDOW_DAYS,
            lc.escalation_days
        );
        anyhow::ensure!(
            lc.reconcile_interval_secs > 0,
            "lifecycle.reconcile_interval_secs must be positive"
        );
        anyhow::ensure!(lc.batch_size > 0, "lifecycle.batch_size must be positive");
        Ok(())
    }
}
