//! Application-level configuration loading: cache expiry, disconnect policy and housekeeping cadence.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LIVE_POLL_CONFIG_PATH";

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_KICK_GRACE: Duration = Duration::from_millis(500);
const DEFAULT_SESSION_INACTIVITY: Duration = Duration::from_secs(3600);
const DEFAULT_STUDENT_INACTIVITY: Duration = Duration::from_secs(600);
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(600);
const DEFAULT_ORPHAN_POLL_GRACE: Duration = Duration::from_secs(60);

/// What happens to the active poll when the teacher's connection drops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeacherDisconnectPolicy {
    /// Keep the poll running; students see a view-only notice.
    #[default]
    Continue,
    /// Close the active poll with reason "Teacher disconnected".
    AutoClose,
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    cache_ttl: Duration,
    teacher_disconnect_policy: TeacherDisconnectPolicy,
    kick_grace: Duration,
    session_inactivity: Duration,
    student_inactivity: Duration,
    cleanup_interval: Duration,
    orphan_poll_grace: Duration,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        policy = ?app_config.teacher_disconnect_policy,
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Expiry applied to the active poll pointer, its tally and the teacher claim.
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Behaviour applied when the teacher's connection drops.
    pub fn teacher_disconnect_policy(&self) -> TeacherDisconnectPolicy {
        self.teacher_disconnect_policy
    }

    /// Delay between notifying a kicked student and closing their connection.
    pub fn kick_grace(&self) -> Duration {
        self.kick_grace
    }

    /// Idle time after which a durable session is ended by the cleanup task.
    pub fn session_inactivity(&self) -> Duration {
        self.session_inactivity
    }

    /// Idle time after which a student is dropped from the roster.
    pub fn student_inactivity(&self) -> Duration {
        self.student_inactivity
    }

    /// Cadence of the cleanup task.
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Extra time past its duration before an active poll is considered orphaned.
    pub fn orphan_poll_grace(&self) -> Duration {
        self.orphan_poll_grace
    }

    /// Copy of this configuration with another disconnect policy.
    pub fn with_teacher_disconnect_policy(mut self, policy: TeacherDisconnectPolicy) -> Self {
        self.teacher_disconnect_policy = policy;
        self
    }

    /// Copy of this configuration with another kick grace delay.
    pub fn with_kick_grace(mut self, grace: Duration) -> Self {
        self.kick_grace = grace;
        self
    }

    /// Copy of this configuration with other inactivity thresholds.
    pub fn with_inactivity(mut self, session: Duration, student: Duration) -> Self {
        self.session_inactivity = session;
        self.student_inactivity = student;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            teacher_disconnect_policy: TeacherDisconnectPolicy::default(),
            kick_grace: DEFAULT_KICK_GRACE,
            session_inactivity: DEFAULT_SESSION_INACTIVITY,
            student_inactivity: DEFAULT_STUDENT_INACTIVITY,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            orphan_poll_grace: DEFAULT_ORPHAN_POLL_GRACE,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    cache_ttl_secs: Option<u64>,
    teacher_disconnect_policy: Option<TeacherDisconnectPolicy>,
    kick_grace_ms: Option<u64>,
    session_inactivity_secs: Option<u64>,
    student_inactivity_secs: Option<u64>,
    cleanup_interval_secs: Option<u64>,
    orphan_poll_grace_secs: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let secs = |raw: Option<u64>, fallback: Duration| {
            raw.map(Duration::from_secs).unwrap_or(fallback)
        };
        Self {
            cache_ttl: secs(value.cache_ttl_secs, DEFAULT_CACHE_TTL),
            teacher_disconnect_policy: value.teacher_disconnect_policy.unwrap_or_default(),
            kick_grace: value
                .kick_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_KICK_GRACE),
            session_inactivity: secs(value.session_inactivity_secs, DEFAULT_SESSION_INACTIVITY),
            student_inactivity: secs(value.student_inactivity_secs, DEFAULT_STUDENT_INACTIVITY),
            // A zero interval would spin the cleanup task.
            cleanup_interval: secs(value.cleanup_interval_secs, DEFAULT_CLEANUP_INTERVAL)
                .max(Duration::from_secs(1)),
            orphan_poll_grace: secs(value.orphan_poll_grace_secs, DEFAULT_ORPHAN_POLL_GRACE),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_keep_defaults() {
        let raw: RawConfig = serde_json::from_str(r#"{"kick_grace_ms": 250}"#).unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.kick_grace(), Duration::from_millis(250));
        assert_eq!(config.cache_ttl(), DEFAULT_CACHE_TTL);
        assert_eq!(
            config.teacher_disconnect_policy(),
            TeacherDisconnectPolicy::Continue
        );
    }

    #[test]
    fn disconnect_policy_parses_snake_case() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"teacher_disconnect_policy": "auto_close"}"#).unwrap();
        assert_eq!(
            AppConfig::from(raw).teacher_disconnect_policy(),
            TeacherDisconnectPolicy::AutoClose
        );
    }

    #[test]
    fn zero_cleanup_interval_is_clamped() {
        let raw: RawConfig = serde_json::from_str(r#"{"cleanup_interval_secs": 0}"#).unwrap();
        assert_eq!(
            AppConfig::from(raw).cleanup_interval(),
            Duration::from_secs(1)
        );
    }
}
