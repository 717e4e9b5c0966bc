use std::fmt;

use serde::{Deserialize, Serialize};

/// Guest customization status reported while a forced customization is queued.
pub const GC_PENDING: &str = "GC_PENDING";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    PoweredOff,
    PoweredOn,
    Suspended,
    Resolved,
    Unresolved,
    Mixed,
    Unknown,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerState::PoweredOff => "POWERED_OFF",
            PowerState::PoweredOn => "POWERED_ON",
            PowerState::Suspended => "SUSPENDED",
            PowerState::Resolved => "RESOLVED",
            PowerState::Unresolved => "UNRESOLVED",
            PowerState::Mixed => "MIXED",
            PowerState::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "POWERED_OFF" => PowerState::PoweredOff,
            "POWERED_ON" => PowerState::PoweredOn,
            "SUSPENDED" => PowerState::Suspended,
            "RESOLVED" => PowerState::Resolved,
            "UNRESOLVED" => PowerState::Unresolved,
            "MIXED" => PowerState::Mixed,
            _ => PowerState::Unknown,
        }
    }

    /// States in which mutations that require a stopped object are accepted.
    pub fn is_off(self) -> bool {
        matches!(self, PowerState::PoweredOff | PowerState::Resolved)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerStatus {
    pub state: PowerState,
    pub deployed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerOnOptions {
    pub force_customization: bool,
}
