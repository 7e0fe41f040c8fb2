//! Runtime trace configuration.
//!
//! The trace stream is a development aid consumed by tooling; enabling it
//! never changes execution semantics.

use serde::{Deserialize, Serialize};

/// How much the interpreter writes to the trace sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    /// No trace output.
    #[default]
    None,
    /// Actions added to the result.
    Actions,
    /// Commands (operations) as they execute.
    Commands,
    /// Tests and their outcomes.
    Tests,
    /// Individual match attempts.
    Matching,
}

/// Trace settings carried in the script environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TraceConfig {
    /// Verbosity threshold.
    pub level: TraceLevel,
    /// Prefix every line with the bytecode address.
    pub addresses: bool,
}

impl TraceConfig {
    /// Whether `level` output is enabled under this configuration.
    #[must_use]
    pub fn enabled(&self, level: TraceLevel) -> bool {
        self.level >= level && level != TraceLevel::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_thresholds() {
        let cfg = TraceConfig {
            level: TraceLevel::Tests,
            addresses: false,
        };
        assert!(cfg.enabled(TraceLevel::Actions));
        assert!(cfg.enabled(TraceLevel::Tests));
        assert!(!cfg.enabled(TraceLevel::Matching));
    }

    #[test]
    fn test_none_is_silent() {
        let cfg = TraceConfig::default();
        assert!(!cfg.enabled(TraceLevel::Actions));
        assert!(!cfg.enabled(TraceLevel::None));
    }

    #[test]
    fn test_json_round_trip() {
        let cfg = TraceConfig {
            level: TraceLevel::Matching,
            addresses: true,
        };
        let json = serde_json::to_string(&cfg).expect("serialize");
        let back: TraceConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_parses_host_config_shape() {
        // The shape a host's JSON settings file hands us.
        let cfg: TraceConfig =
            serde_json::from_str(r#"{"level": "tests", "addresses": false}"#).expect("parse");
        assert_eq!(cfg.level, TraceLevel::Tests);
        assert!(!cfg.addresses);
    }
}
