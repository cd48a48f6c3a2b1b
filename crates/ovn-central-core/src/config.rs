//! Desired runtime configuration for the clustered databases.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Lowest accepted election timer, in seconds.
pub const MIN_ELECTION_TIMER_SECS: u64 = 1;

/// Highest accepted election timer, in seconds.
pub const MAX_ELECTION_TIMER_SECS: u64 = 60;

/// Default election timer, in seconds.
pub const DEFAULT_ELECTION_TIMER_SECS: u64 = 4;

/// Default inactivity probe, in seconds.
pub const DEFAULT_INACTIVITY_PROBE_SECS: u64 = 60;

/// Default number of join attempts before a member is marked failed.
pub const DEFAULT_MAX_JOIN_ATTEMPTS: u32 = 3;

fn default_services() -> Vec<String> {
    vec![
        "ovn-northd".to_string(),
        "ovn-ovsdb-server-nb".to_string(),
        "ovn-ovsdb-server-sb".to_string(),
    ]
}

fn default_election_timer() -> u64 {
    DEFAULT_ELECTION_TIMER_SECS
}

fn default_inactivity_probe() -> u64 {
    DEFAULT_INACTIVITY_PROBE_SECS
}

fn default_true() -> bool {
    true
}

fn default_max_join_attempts() -> u32 {
    DEFAULT_MAX_JOIN_ATTEMPTS
}

/// Runtime parameters for both clusters plus restart policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CentralConfig {
    /// Desired Raft election timer in seconds (1-60).
    #[serde(rename = "ovsdb-server-election-timer", default = "default_election_timer")]
    pub election_timer_secs: u64,

    /// Desired inactivity probe in seconds.
    #[serde(rename = "ovsdb-server-inactivity-probe", default = "default_inactivity_probe")]
    pub inactivity_probe_secs: u64,

    /// Whether configuration changes may restart services immediately.
    #[serde(default = "default_true")]
    pub enable_auto_restarts: bool,

    /// Join attempts before a member is marked failed.
    #[serde(default = "default_max_join_attempts")]
    pub max_join_attempts: u32,

    /// Services managed on this unit.
    #[serde(default = "default_services")]
    pub services: Vec<String>,

    /// Services restarted after TLS material changes. Empty means all of `services`.
    #[serde(default)]
    pub tls_services: Vec<String>,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            election_timer_secs: DEFAULT_ELECTION_TIMER_SECS,
            inactivity_probe_secs: DEFAULT_INACTIVITY_PROBE_SECS,
            enable_auto_restarts: true,
            max_join_attempts: DEFAULT_MAX_JOIN_ATTEMPTS,
            services: default_services(),
            tls_services: Vec::new(),
        }
    }
}

impl CentralConfig {
    /// Set the desired election timer in seconds.
    pub fn with_election_timer(mut self, secs: u64) -> Self {
        self.election_timer_secs = secs;
        self
    }

    /// Set the desired inactivity probe in seconds.
    pub fn with_inactivity_probe(mut self, secs: u64) -> Self {
        self.inactivity_probe_secs = secs;
        self
    }

    /// Enable or disable automatic restarts.
    pub fn with_auto_restarts(mut self, enabled: bool) -> Self {
        self.enable_auto_restarts = enabled;
        self
    }

    /// Set the join attempt budget.
    pub fn with_max_join_attempts(mut self, attempts: u32) -> Self {
        self.max_join_attempts = attempts;
        self
    }

    /// Replace the managed services.
    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }

    /// Election timer in milliseconds, the unit the store works in.
    pub fn election_timer_ms(&self) -> u64 {
        self.election_timer_secs * 1000
    }

    /// Inactivity probe in milliseconds.
    pub fn inactivity_probe_ms(&self) -> u64 {
        self.inactivity_probe_secs * 1000
    }

    /// Services that consume TLS material.
    pub fn tls_services(&self) -> &[String] {
        if self.tls_services.is_empty() {
            &self.services
        } else {
            &self.tls_services
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_ELECTION_TIMER_SECS..=MAX_ELECTION_TIMER_SECS).contains(&self.election_timer_secs)
        {
            return Err(ConfigError::ElectionTimerOutOfRange {
                value: self.election_timer_secs,
                min: MIN_ELECTION_TIMER_SECS,
                max: MAX_ELECTION_TIMER_SECS,
            });
        }
        if self.inactivity_probe_secs == 0 {
            return Err(ConfigError::InactivityProbeZero);
        }
        if self.services.is_empty() {
            return Err(ConfigError::NoServices);
        }
        if self.max_join_attempts == 0 {
            return Err(ConfigError::NoJoinAttempts);
        }
        Ok(())
    }
}
