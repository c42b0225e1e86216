//! Cloud resource capabilities
//!
//! The engine talks to the provider only through two narrow traits:
//! [`StateChecker`] for observation and [`Operator`] for mutation.
//! Anything implementing both is a [`CloudResourceClient`].

use async_trait::async_trait;
use std::fmt;

use crate::error::Result;
use crate::schedule::{Action, ResourceRef};

/// Live state classification of a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    /// Stable running state
    Running,
    /// Stable stopped state
    Stopped,
    /// Any other provider state (provisioning, starting, stopping, ...)
    Transitional(String),
}

impl ResourceState {
    /// Classify a provider status label
    pub fn from_status(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "STOPPED" => Self::Stopped,
            _ => Self::Transitional(status.to_string()),
        }
    }

    /// Whether the resource is between stable states
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Transitional(_))
    }

    /// State an action drives the resource into
    pub fn target_of(action: Action) -> Self {
        match action {
            Action::Start => Self::Running,
            Action::Stop => Self::Stopped,
        }
    }

    /// Action that drives the resource into this state
    pub fn reached_by(&self) -> Option<Action> {
        match self {
            Self::Running => Some(Action::Start),
            Self::Stopped => Some(Action::Stop),
            Self::Transitional(_) => None,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
            Self::Transitional(label) => write!(f, "{}", label.to_ascii_lowercase()),
        }
    }
}

/// Reads live resource state
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateChecker: Send + Sync {
    /// Fetch the current state of `resource`
    async fn get_state(&self, resource: &ResourceRef) -> Result<ResourceState>;
}

/// Mutates resource lifecycle
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Operator: Send + Sync {
    /// Start `resource` and wait for the provider operation to finish
    async fn start(&self, resource: &ResourceRef) -> Result<()>;

    /// Stop `resource` and wait for the provider operation to finish
    async fn stop(&self, resource: &ResourceRef) -> Result<()>;
}

/// Full cloud capability used by the executor
pub trait CloudResourceClient: StateChecker + Operator {}

impl<T: StateChecker + Operator + ?Sized> CloudResourceClient for T {}
