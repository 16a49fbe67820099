//! Deployment window gate

use chrono::{Local, Timelike};
use serde::Deserialize;

use crate::error::{GatewayError, Result};

/// Inclusive range of hours (0-23) in which deployments may proceed.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentWindowConfig {
    pub from_hour: u32,
    pub to_hour: u32,
}

impl DeploymentWindowConfig {
    /// Hours must be valid clock hours and the window must not wrap past
    /// midnight. `is_allowed` itself keeps the literal comparison, so a
    /// wrapping window would never admit a deployment.
    pub fn validate(&self) -> Result<()> {
        if self.from_hour > 23 || self.to_hour > 23 || self.from_hour > self.to_hour {
            return Err(GatewayError::InvalidWindow {
                from_hour: self.from_hour,
                to_hour: self.to_hour,
            });
        }
        Ok(())
    }
}

/// Source of the current time, in the process's local time zone.
pub trait Clock: Send + Sync {
    fn current_hour(&self) -> u32;
}

/// Reads the wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn current_hour(&self) -> u32 {
        Local::now().hour()
    }
}

/// Always reports the same hour.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u32);

impl Clock for FixedClock {
    fn current_hour(&self) -> u32 {
        self.0
    }
}

/// Returns true if `now` falls inside the inclusive window.
pub fn is_allowed(now: &impl Timelike, config: &DeploymentWindowConfig) -> bool {
    hour_in_window(now.hour(), config)
}

pub fn hour_in_window(hour: u32, config: &DeploymentWindowConfig) -> bool {
    config.from_hour <= hour && hour <= config.to_hour
}
