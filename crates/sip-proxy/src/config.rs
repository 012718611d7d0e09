// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::ForkError;
use crate::priority::ResponsePriorities;

/// How candidates of one queue are grouped when launched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForkBehavior {
    /// One target at a time, highest q first.
    FullSequential,
    /// All targets sharing the highest remaining q at once.
    #[default]
    EqualQParallel,
    /// Every target in the queue at once.
    FullParallel,
}

impl ForkBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForkBehavior::FullSequential => "FULL_SEQUENTIAL",
            ForkBehavior::EqualQParallel => "EQUAL_Q_PARALLEL",
            ForkBehavior::FullParallel => "FULL_PARALLEL",
        }
    }
}

impl FromStr for ForkBehavior {
    type Err = ForkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FULL_SEQUENTIAL" => Ok(ForkBehavior::FullSequential),
            "EQUAL_Q_PARALLEL" => Ok(ForkBehavior::EqualQParallel),
            "FULL_PARALLEL" => Ok(ForkBehavior::FullParallel),
            _ => Err(ForkError::UnknownBehavior(SmolStr::new(s))),
        }
    }
}

/// Forking policy for one proxy instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForkConfig {
    pub behavior: ForkBehavior,
    /// Cancel a group `ms_before_cancel` after it started when more
    /// candidates are waiting.
    pub cancel_between_fork_groups: bool,
    /// Start the next group only once the previous one has terminated.
    pub wait_for_terminate: bool,
    pub ms_between_fork_groups: u64,
    pub ms_before_cancel: u64,
    /// Timer C for INVITE (RFC 3261 §16.8); `0` disables it.
    pub timer_c_secs: u64,
    /// Sent upstream when every branch ended without a final response.
    pub default_final_code: u16,
    pub via_host: SmolStr,
    pub via_transport: SmolStr,
    pub priorities: ResponsePriorities,
}

impl Default for ForkConfig {
    fn default() -> Self {
        Self {
            behavior: ForkBehavior::default(),
            cancel_between_fork_groups: true,
            wait_for_terminate: true,
            ms_between_fork_groups: 3000,
            ms_before_cancel: 3000,
            timer_c_secs: 180,
            default_final_code: 480,
            via_host: SmolStr::new_inline("127.0.0.1"),
            via_transport: SmolStr::new_inline("UDP"),
            priorities: ResponsePriorities::default(),
        }
    }
}

impl ForkConfig {
    pub fn between_fork_groups(&self) -> Duration {
        Duration::from_millis(self.ms_between_fork_groups)
    }

    pub fn before_cancel(&self) -> Duration {
        Duration::from_millis(self.ms_before_cancel)
    }

    pub fn timer_c(&self) -> Option<Duration> {
        (self.timer_c_secs > 0).then(|| Duration::from_secs(self.timer_c_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn behavior_names() {
        assert_eq!(
            "full_sequential".parse::<ForkBehavior>().unwrap(),
            ForkBehavior::FullSequential
        );
        assert_eq!(
            ForkBehavior::EqualQParallel.as_str().parse::<ForkBehavior>().unwrap(),
            ForkBehavior::EqualQParallel
        );
        assert!(matches!(
            "ROUND_ROBIN".parse::<ForkBehavior>(),
            Err(ForkError::UnknownBehavior(_))
        ));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ForkConfig = serde_json::from_str(
            r#"{ "behavior": "FULL_SEQUENTIAL", "ms_before_cancel": 500,
                 "priorities": { "overrides": { "486": 1 } } }"#,
        )
        .unwrap();
        assert_eq!(config.behavior, ForkBehavior::FullSequential);
        assert_eq!(config.before_cancel(), Duration::from_millis(500));
        assert_eq!(config.ms_between_fork_groups, 3000);
        assert_eq!(config.default_final_code, 480);
        assert_eq!(config.priorities.rank(486), 1);
        assert!(config.cancel_between_fork_groups);
    }

    #[test]
    fn timer_c_can_be_disabled() {
        let config = ForkConfig {
            timer_c_secs: 0,
            ..ForkConfig::default()
        };
        assert!(config.timer_c().is_none());
        assert_eq!(ForkConfig::default().timer_c(), Some(Duration::from_secs(180)));
    }
}
