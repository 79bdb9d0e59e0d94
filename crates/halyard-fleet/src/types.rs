//! Program metadata mirrored from each domain's store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Program metadata needed for dispatch decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramEntry {
    /// Domain the program belongs to.
    pub domain: String,
    /// Program identifier, unique within its domain.
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Program kind.
    pub program_type: ProgramType,
    /// Lifecycle state.
    pub state: ProgramState,
    /// Language the program is written in.
    pub language: String,
    /// Schedule expression for routines.
    pub schedule: String,
    /// Execution deadline.
    #[serde(serialize_with = "serialize_millis")]
    pub deadline: Duration,
    /// Latest signed code revision, if any.
    pub revision: Option<i32>,
}

impl ProgramEntry {
    /// Returns true if the program is active and has signed code.
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.state == ProgramState::Active && self.revision.is_some()
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    s.serialize_u64(d.as_millis() as u64)
}

/// Program lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramState {
    /// Eligible for execution.
    Active,
    /// Disabled by its owner.
    Inactive,
    /// Kept for history, never executed.
    Zombie,
}

impl ProgramState {
    /// Returns the string representation used in storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Zombie => "zombie",
        }
    }
}

impl fmt::Display for ProgramState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProgramState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "zombie" => Ok(Self::Zombie),
            _ => Err(format!("unknown program state: {s}")),
        }
    }
}

/// Program kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramType {
    /// Runs on a schedule.
    Routine,
    /// Runs in response to an inbound request.
    Webhook,
    /// Library code imported by other programs.
    Module,
}

impl ProgramType {
    /// Returns the string representation used in storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Routine => "routine",
            Self::Webhook => "webhook",
            Self::Module => "module",
        }
    }
}

impl fmt::Display for ProgramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProgramType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "routine" => Ok(Self::Routine),
            "webhook" => Ok(Self::Webhook),
            "module" => Ok(Self::Module),
            _ => Err(format!("unknown program type: {s}")),
        }
    }
}
