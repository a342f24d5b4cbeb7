//! Deployment target selection.
//!
//! Environment names, rollback targets and the production deployment
//! mechanism are closed enums so an unrecognized name is rejected up front
//! instead of falling through a string match.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Rollback,
}

impl Environment {
    const ACCEPTED: &'static [&'static str] = &["development", "dev", "production", "prod", "rollback"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Rollback => "rollback",
        }
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "rollback" => Ok(Environment::Rollback),
            other => Err(unknown_name("environment", other, Self::ACCEPTED)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward target that a rollback reverts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackTarget {
    #[default]
    Development,
    Production,
}

impl RollbackTarget {
    const ACCEPTED: &'static [&'static str] = &["development", "dev", "production", "prod"];

    pub fn as_str(&self) -> &'static str {
        match self {
            RollbackTarget::Development => "development",
            RollbackTarget::Production => "production",
        }
    }
}

impl FromStr for RollbackTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "development" | "dev" => Ok(RollbackTarget::Development),
            "production" | "prod" => Ok(RollbackTarget::Production),
            other => Err(unknown_name("target", other, Self::ACCEPTED)),
        }
    }
}

impl fmt::Display for RollbackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How production receives a new version: managed cluster update or direct host restart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMechanism {
    #[default]
    Ecs,
    Ec2,
}

impl DeployMechanism {
    const ACCEPTED: &'static [&'static str] = &["ecs", "ec2"];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeployMechanism::Ecs => "ecs",
            DeployMechanism::Ec2 => "ec2",
        }
    }
}

impl FromStr for DeployMechanism {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ecs" => Ok(DeployMechanism::Ecs),
            "ec2" => Ok(DeployMechanism::Ec2),
            other => Err(unknown_name("mechanism", other, Self::ACCEPTED)),
        }
    }
}

impl fmt::Display for DeployMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn unknown_name(field: &str, value: &str, accepted: &[&str]) -> Error {
    Error::validation_invalid_argument(
        field,
        format!("Unknown {} '{}'. Expected one of: {}", field, value, accepted.join(", ")),
        Some(value.to_string()),
        Some(accepted.iter().map(|s| s.to_string()).collect()),
    )
}
