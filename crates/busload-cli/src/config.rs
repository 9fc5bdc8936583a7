//! Run-plan vault – reads/writes `~/.busload/config.toml`.

use busload_types::DeliveryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persisted load-run plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPlan {
    /// Virtual users per wave.  Also the writer cohort size.
    #[serde(default = "default_vus")]
    pub vus: usize,

    /// Number of waves to run.
    #[serde(default = "default_waves")]
    pub waves: usize,

    /// Target size of each generated JSON payload, in bytes.
    #[serde(default = "default_payload_bytes")]
    pub payload_bytes: usize,

    /// `rate` argument of `writeByRate`.
    #[serde(default = "default_rate")]
    pub rate: u64,

    /// `chunkSize` argument of `writeByRate`.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Delivery policy the wave reader reassembles with.
    #[serde(default)]
    pub policy: DeliveryPolicy,

    /// How long a wave's reader may block before the run is abandoned.
    #[serde(default = "default_reader_timeout_secs")]
    pub reader_timeout_secs: u64,
}

fn default_vus() -> usize {
    4
}
fn default_waves() -> usize {
    3
}
fn default_payload_bytes() -> usize {
    64
}
fn default_rate() -> u64 {
    8
}
fn default_chunk_size() -> usize {
    8
}
fn default_reader_timeout_secs() -> u64 {
    30
}

impl Default for RunPlan {
    fn default() -> Self {
        Self {
            vus: default_vus(),
            waves: default_waves(),
            payload_bytes: default_payload_bytes(),
            rate: default_rate(),
            chunk_size: default_chunk_size(),
            policy: DeliveryPolicy::default(),
            reader_timeout_secs: default_reader_timeout_secs(),
        }
    }
}

impl RunPlan {
    pub fn reader_timeout(&self) -> Duration {
        Duration::from_secs(self.reader_timeout_secs)
    }

    /// Reject plans that cannot produce a single write.
    pub fn validate(&self) -> Result<(), String> {
        if self.vus == 0 {
            return Err("vus must be at least 1".to_string());
        }
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than zero".to_string());
        }
        if self.wave_stream_len().is_none() {
            return Err(format!(
                "{} vus × {} B payloads is too large a wave",
                self.vus, self.payload_bytes
            ));
        }
        Ok(())
    }

    /// Bytes the reader reassembles per wave: `vus` payloads of
    /// [`payload_len`](crate::swarm::payload_len) bytes.  `None` when that
    /// does not fit the script's signed length argument.
    pub fn wave_stream_len(&self) -> Option<i64> {
        let total = self.vus.checked_mul(crate::swarm::payload_len(self.payload_bytes))?;
        i64::try_from(total).ok()
    }
}

/// Return the path to `~/.busload/config.toml`.
pub fn plan_path() -> PathBuf {
    plan_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn plan_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".busload").join("config.toml")
}

/// Load the plan from `path`.  Returns `None` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<RunPlan>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read plan at {}: {}", path.display(), e))?;
    let mut plan: RunPlan =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse plan: {}", e))?;
    apply_env_overrides(&mut plan);
    Ok(Some(plan))
}

/// Apply `BUSLOAD_*` environment variable overrides to `plan`.
///
/// | Variable | Plan field |
/// |---|---|
/// | `BUSLOAD_VUS` | `vus` |
/// | `BUSLOAD_WAVES` | `waves` |
/// | `BUSLOAD_RATE` | `rate` |
/// | `BUSLOAD_CHUNK_SIZE` | `chunk_size` |
/// | `BUSLOAD_POLICY` | `policy` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(plan: &mut RunPlan) {
    apply_overrides(plan, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(plan: &mut RunPlan, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(n) = lookup("BUSLOAD_VUS").and_then(|v| v.parse().ok()) {
        plan.vus = n;
    }
    if let Some(n) = lookup("BUSLOAD_WAVES").and_then(|v| v.parse().ok()) {
        plan.waves = n;
    }
    if let Some(n) = lookup("BUSLOAD_RATE").and_then(|v| v.parse().ok()) {
        plan.rate = n;
    }
    if let Some(n) = lookup("BUSLOAD_CHUNK_SIZE").and_then(|v| v.parse().ok()) {
        plan.chunk_size = n;
    }
    if let Some(policy) = lookup("BUSLOAD_POLICY").and_then(|v| v.parse().ok()) {
        plan.policy = policy;
    }
}

/// Save the plan to `path`, creating the parent directory if necessary.
pub fn save_to(plan: &RunPlan, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create plan directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(plan)
        .map_err(|e| format!("Failed to serialize plan: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write plan at {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_plan() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = plan_path_for_home(&dir.path().to_string_lossy());

        save_to(&RunPlan::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.vus, 4);
        assert_eq!(loaded.chunk_size, 8);
        assert_eq!(loaded.policy, DeliveryPolicy::Sequenced);
    }

    #[test]
    fn partial_file_takes_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("plan.toml");
        fs::write(&path, "vus = 2\npolicy = \"latest_only\"\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.vus, 2);
        assert_eq!(loaded.policy, DeliveryPolicy::LatestOnly);
        assert_eq!(loaded.waves, 3);
        assert_eq!(loaded.reader_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("plan.toml");
        fs::write(&path, "vus = \"many\"").expect("write");
        assert!(load_from(&path).unwrap_err().contains("Failed to parse plan"));
    }

    #[test]
    fn plan_path_points_to_busload_dir() {
        let p = plan_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".busload"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = plan_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn validate_rejects_empty_plans() {
        let mut plan = RunPlan::default();
        assert!(plan.validate().is_ok());
        plan.chunk_size = 0;
        assert!(plan.validate().is_err());
        plan.chunk_size = 1;
        plan.vus = 0;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn validate_rejects_waves_that_overflow_the_length() {
        let mut plan = RunPlan::default();
        assert_eq!(plan.wave_stream_len(), Some(4 * 64));

        plan.vus = usize::MAX;
        assert!(plan.wave_stream_len().is_none());
        assert!(plan.validate().unwrap_err().contains("too large"));

        plan.vus = 2;
        plan.payload_bytes = usize::MAX / 2 + 1;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn overrides_change_plan_and_skip_garbage() {
        let vars = std::collections::HashMap::from([
            ("BUSLOAD_VUS", "9"),
            ("BUSLOAD_CHUNK_SIZE", "not-a-number"),
            ("BUSLOAD_POLICY", "best_effort"),
        ]);
        let mut plan = RunPlan::default();
        apply_overrides(&mut plan, |key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(plan.vus, 9);
        assert_eq!(plan.chunk_size, 8);
        assert_eq!(plan.policy, DeliveryPolicy::LatestOnly);
        assert_eq!(plan.rate, 8);
    }
}
