//! Collector tunables, built in code or read from `RCMARK_GC_*` environment variables.

use std::str::FromStr;

use crate::error::{ConfigError, FatalPolicy};

/// Bytes that may be allocated after a lite sweep before the next one is due.
pub const DEFAULT_GCLITE_MARGIN: usize = 10_000;
/// Heap size at which a full mark-sweep is requested.
pub const DEFAULT_TRIGGER_LEVEL: usize = 8 * 1024 * 1024;
/// The adaptive trigger never drops below this.
pub const DEFAULT_MIN_TRIGGER_LEVEL: usize = 2 * 1024 * 1024;
/// Budget for freed blocks held back by the quarantine shim.
pub const DEFAULT_QUARANTINE_BYTES: usize = 10 * 1024 * 1024;

/// When lite sweeps run relative to allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcMode {
    /// lite sweep whenever the margin above the last sweep is used up
    #[default]
    Normal,
    /// lite sweep before every allocation
    Aggressive,
    /// lite sweep only once the full collection trigger is reached
    Rare,
}

impl FromStr for GcMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(GcMode::Normal),
            "aggressive" => Ok(GcMode::Aggressive),
            "rare" => Ok(GcMode::Rare),
            other => Err(format!(
                "unknown mode {other:?}, expected normal, aggressive or rare"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcConfig {
    pub gclite_margin: usize,
    pub trigger_level: usize,
    pub min_trigger_level: usize,
    pub adaptive_trigger: bool,
    pub mode: GcMode,
    /// quarantine budget in bytes, `None` disables the shim
    pub quarantine: Option<usize>,
    pub verbose: bool,
    pub fatal_policy: FatalPolicy,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            gclite_margin: DEFAULT_GCLITE_MARGIN,
            trigger_level: DEFAULT_TRIGGER_LEVEL,
            min_trigger_level: DEFAULT_MIN_TRIGGER_LEVEL,
            adaptive_trigger: true,
            mode: GcMode::Normal,
            quarantine: None,
            verbose: false,
            fatal_policy: FatalPolicy::Abort,
        }
    }
}

impl GcConfig {
    pub fn with_gclite_margin(mut self, bytes: usize) -> Self {
        self.gclite_margin = bytes;
        self
    }

    pub fn with_trigger_level(mut self, bytes: usize) -> Self {
        self.trigger_level = bytes;
        self
    }

    pub fn with_min_trigger_level(mut self, bytes: usize) -> Self {
        self.min_trigger_level = bytes;
        self
    }

    pub fn with_adaptive_trigger(mut self, adaptive: bool) -> Self {
        self.adaptive_trigger = adaptive;
        self
    }

    pub fn with_mode(mut self, mode: GcMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_quarantine(mut self, budget: Option<usize>) -> Self {
        self.quarantine = budget;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_fatal_policy(mut self, policy: FatalPolicy) -> Self {
        self.fatal_policy = policy;
        self
    }

    /// Defaults overridden by whatever `RCMARK_GC_*` variables are set in the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env(|var| std::env::var(var).ok())
    }

    /// Override fields from `lookup`, which maps a variable name to its value if set.
    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("RCMARK_GC_MARGIN") {
            self.gclite_margin = parse_size("RCMARK_GC_MARGIN", &value)?;
        }
        if let Some(value) = lookup("RCMARK_GC_TRIGGER") {
            self.trigger_level = parse_size("RCMARK_GC_TRIGGER", &value)?;
        }
        if let Some(value) = lookup("RCMARK_GC_MIN_TRIGGER") {
            self.min_trigger_level = parse_size("RCMARK_GC_MIN_TRIGGER", &value)?;
        }
        if let Some(value) = lookup("RCMARK_GC_MODE") {
            self.mode = value
                .parse()
                .map_err(|reason| invalid("RCMARK_GC_MODE", &value, reason))?;
        }
        if let Some(value) = lookup("RCMARK_GC_ADAPTIVE") {
            self.adaptive_trigger = parse_flag("RCMARK_GC_ADAPTIVE", &value)?;
        }
        if let Some(value) = lookup("RCMARK_GC_VERBOSE") {
            self.verbose = parse_flag("RCMARK_GC_VERBOSE", &value)?;
        }
        if let Some(value) = lookup("RCMARK_GC_QUARANTINE") {
            self.quarantine = parse_quarantine(&value)?;
        }
        self.validate()
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.min_trigger_level > self.trigger_level {
            return Err(ConfigError::TriggerBelowMinimum {
                min: self.min_trigger_level,
                trigger: self.trigger_level,
            });
        }
        Ok(self)
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        var,
        value: value.to_owned(),
        reason: reason.into(),
    }
}

/// Parse a byte count with an optional `K`, `M` or `G` suffix (powers of 1024).
pub fn parse_size(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    let trimmed = value.trim();
    let (digits, multiplier) = match trimmed.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&trimmed[..trimmed.len() - 1], 1024),
        Some('M') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('G') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        _ => (trimmed, 1),
    };
    let count: usize = digits
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(var, value, e.to_string()))?;
    count
        .checked_mul(multiplier)
        .ok_or_else(|| invalid(var, value, "size overflows usize"))
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, value, "expected a boolean")),
    }
}

fn parse_quarantine(value: &str) -> Result<Option<usize>, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "0" | "off" | "false" | "no" => Ok(None),
        "on" | "true" | "yes" => Ok(Some(DEFAULT_QUARANTINE_BYTES)),
        _ => parse_size("RCMARK_GC_QUARANTINE", value).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = GcConfig::default();
        assert_eq!(config.gclite_margin, 10_000);
        assert_eq!(config.trigger_level, 8 * 1024 * 1024);
        assert_eq!(config.quarantine, None);
        assert_eq!(config.mode, GcMode::Normal);
    }

    #[test]
    fn test_merge_env() {
        let config = GcConfig::default()
            .merge_env(lookup(&[
                ("RCMARK_GC_MARGIN", "512"),
                ("RCMARK_GC_TRIGGER", "16M"),
                ("RCMARK_GC_MODE", "Aggressive"),
                ("RCMARK_GC_ADAPTIVE", "off"),
                ("RCMARK_GC_QUARANTINE", "on"),
            ]))
            .unwrap();
        assert_eq!(config.gclite_margin, 512);
        assert_eq!(config.trigger_level, 16 * 1024 * 1024);
        assert_eq!(config.mode, GcMode::Aggressive);
        assert!(!config.adaptive_trigger);
        assert_eq!(config.quarantine, Some(DEFAULT_QUARANTINE_BYTES));
    }

    #[test]
    fn test_merge_env_rejects_garbage() {
        let err = GcConfig::default()
            .merge_env(lookup(&[("RCMARK_GC_MARGIN", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                var: "RCMARK_GC_MARGIN",
                ..
            }
        ));
        assert!(GcConfig::default()
            .merge_env(lookup(&[("RCMARK_GC_MODE", "sometimes")]))
            .is_err());
    }

    #[test]
    fn test_min_trigger_must_not_exceed_trigger() {
        let err = GcConfig::default()
            .merge_env(lookup(&[("RCMARK_GC_TRIGGER", "1K")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::TriggerBelowMinimum {
                min: DEFAULT_MIN_TRIGGER_LEVEL,
                trigger: 1024
            }
        );
    }
}
