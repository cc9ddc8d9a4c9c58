//! Load config from file and environment.

use std::path::PathBuf;
use std::time::Duration;

use nearmatch_core::{Criteria, Gender, Profile, SessionConfig};
use serde::Deserialize;

/// Daemon configuration. File: ~/.config/nearmatch/config.toml or /etc/nearmatch/config.toml.
/// Env overrides: NEARMATCH_DISCOVERY_PORT, NEARMATCH_STALE_AFTER_MS, NEARMATCH_ALPHA.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// LAN broadcast UDP port (default 45680).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Re-broadcast period of our payload (default 250 ms).
    #[serde(default = "default_advertise_interval_ms")]
    pub advertise_interval_ms: u64,
    /// Silence before a candidate is dropped (default 3000 ms; LAN re-broadcast is slower than BLE).
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    #[serde(default = "default_alpha")]
    pub smoothing_alpha: f64,
    /// UDP carries no signal strength; every LAN sighting reports this.
    #[serde(default = "default_nominal_rssi")]
    pub nominal_rssi: i16,
    #[serde(default = "default_true")]
    pub advertise: bool,
    #[serde(default = "default_true")]
    pub scan: bool,
    #[serde(default)]
    pub profile: ProfileConfig,
}

/// Stand-in for the app's settings store: criteria are listed by index (0..=63).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub traits: Vec<usize>,
    #[serde(default)]
    pub wants: Vec<usize>,
}

/// Shortest re-broadcast period accepted; matches the BLE minimum advertising interval.
pub const MIN_ADVERTISE_INTERVAL_MS: u64 = 20;

fn default_discovery_port() -> u16 {
    45680
}
fn default_advertise_interval_ms() -> u64 {
    250
}
fn default_stale_after_ms() -> u64 {
    3000
}
fn default_cleanup_interval_ms() -> u64 {
    1000
}
fn default_alpha() -> f64 {
    nearmatch_core::session::DEFAULT_SMOOTHING_ALPHA
}
fn default_nominal_rssi() -> i16 {
    -60
}
fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            advertise_interval_ms: default_advertise_interval_ms(),
            stale_after_ms: default_stale_after_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            smoothing_alpha: default_alpha(),
            nominal_rssi: default_nominal_rssi(),
            advertise: true,
            scan: true,
            profile: ProfileConfig::default(),
        }
    }
}

impl Config {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            smoothing_alpha: self.smoothing_alpha,
            stale_after: Duration::from_millis(self.stale_after_ms),
            cleanup_interval: Duration::from_millis(self.cleanup_interval_ms),
            advertise_enabled: self.advertise,
            scan_enabled: self.scan,
        }
    }

    pub fn profile(&self) -> Profile {
        Profile {
            gender: self.profile.gender,
            traits: Criteria::from_indices(self.profile.traits.iter().copied()),
            wants: Criteria::from_indices(self.profile.wants.iter().copied()),
        }
    }

    pub fn advertise_interval(&self) -> Duration {
        Duration::from_millis(self.advertise_interval_ms)
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    sanitize(&mut c);
    c
}

/// Replace values that would make the daemon misbehave with their defaults.
fn sanitize(c: &mut Config) {
    if c.advertise_interval_ms < MIN_ADVERTISE_INTERVAL_MS {
        tracing::warn!(
            advertise_interval_ms = c.advertise_interval_ms,
            min = MIN_ADVERTISE_INTERVAL_MS,
            "advertise interval too short; using default"
        );
        c.advertise_interval_ms = default_advertise_interval_ms();
    }
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("NEARMATCH_DISCOVERY_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.discovery_port = p;
    }
    if let Some(ms) = var("NEARMATCH_STALE_AFTER_MS").and_then(|s| s.parse::<u64>().ok()) {
        c.stale_after_ms = ms;
    }
    if let Some(a) = var("NEARMATCH_ALPHA").and_then(|s| s.parse::<f64>().ok()) {
        c.smoothing_alpha = a;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/nearmatch/config.toml"));
    }
    out.push(PathBuf::from("/etc/nearmatch/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => {
                        tracing::info!(path = %p.display(), "loaded config");
                        return Some(c);
                    }
                    Err(e) => tracing::warn!(path = %p.display(), error = %e, "ignoring invalid config"),
                },
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "cannot read config"),
            }
            break;
        }
    }
    None
}
