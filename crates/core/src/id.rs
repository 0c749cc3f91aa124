//! Strongly-typed identifiers used across the flow-control layer.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier construction/parse error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// An identifier value was empty or whitespace-only.
    #[error("empty identifier: {0}")]
    Empty(&'static str),
}

/// Name of an external AI provider whose availability is tracked
/// independently (e.g. `"openai"`, `"anthropic"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl FromStr for ProviderId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(IdentityError::Empty("ProviderId"));
        }
        Ok(Self(s.to_string()))
    }
}

/// What kind of subject a rate limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    User,
    Ip,
    ApiKey,
}

impl IdentifierKind {
    /// Stable lowercase name, used in store keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierKind::User => "user",
            IdentifierKind::Ip => "ip",
            IdentifierKind::ApiKey => "api_key",
        }
    }
}

impl core::fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rate-limit subject: a user id, client IP, or API key, tagged with its
/// kind so different kinds never collide in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub kind: IdentifierKind,
    pub value: String,
}

impl Identifier {
    pub fn new(kind: IdentifierKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn user(value: impl Into<String>) -> Self {
        Self::new(IdentifierKind::User, value)
    }

    pub fn ip(value: impl Into<String>) -> Self {
        Self::new(IdentifierKind::Ip, value)
    }

    pub fn api_key(value: impl Into<String>) -> Self {
        Self::new(IdentifierKind::ApiKey, value)
    }

    /// `kind:value` form used as a store-key fragment.
    pub fn key_fragment(&self) -> String {
        format!("{}:{}", self.kind, self.value)
    }
}

impl core::fmt::Display for Identifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Namespace of a multi-stage task: the task's type plus this run's id.
///
/// Checkpoints and task metadata are scoped by this pair so concurrent runs
/// of the same task type never share state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub task_type: String,
    pub task_id: String,
}

impl TaskKey {
    pub fn new(task_type: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            task_id: task_id.into(),
        }
    }

    /// `task_type:task_id` form used as a store-key fragment.
    pub fn key_fragment(&self) -> String {
        format!("{}:{}", self.task_type, self.task_id)
    }
}

impl core::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.task_type, self.task_id)
    }
}
