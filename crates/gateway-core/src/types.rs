//! Caller identity and operation classes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Service tier of a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Free tier, subject to rate limiting
    Free,
    /// Premium tier, bypasses rate limiting and gets longer backend timeouts
    Premium,
}

impl Tier {
    /// Returns the tier as a static string
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Premium => "premium",
        }
    }

    /// Check if this is the premium tier
    #[must_use]
    pub fn is_premium(&self) -> bool {
        matches!(self, Self::Premium)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The caller on whose behalf a request is made.
///
/// Immutable for the lifetime of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Stable identifier (user ID, session ID, API key fingerprint)
    pub id: String,
    /// Service tier
    pub tier: Tier,
}

impl Identity {
    /// Create a new identity
    #[must_use]
    pub fn new(id: impl Into<String>, tier: Tier) -> Self {
        Self {
            id: id.into(),
            tier,
        }
    }

    /// Create a free-tier identity
    #[must_use]
    pub fn free(id: impl Into<String>) -> Self {
        Self::new(id, Tier::Free)
    }

    /// Create a premium-tier identity
    #[must_use]
    pub fn premium(id: impl Into<String>) -> Self {
        Self::new(id, Tier::Premium)
    }

    /// Check if this identity bypasses rate limiting
    #[must_use]
    pub fn is_premium(&self) -> bool {
        self.tier.is_premium()
    }
}

/// Operation class of an AI request.
///
/// Each class owns its own cache namespace and circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Analysis of the user's project description
    Analysis,
    /// Field and feature suggestions
    Suggestions,
    /// Prompt enhancement
    Enhancement,
    /// Free-form assistant chat
    Chat,
}

impl Operation {
    /// All operation classes
    pub const ALL: [Self; 4] = [
        Self::Analysis,
        Self::Suggestions,
        Self::Enhancement,
        Self::Chat,
    ];

    /// Returns the operation name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Suggestions => "suggestions",
            Self::Enhancement => "enhancement",
            Self::Chat => "chat",
        }
    }

    /// Cache key namespace for this operation class, including the separator
    #[must_use]
    pub fn cache_prefix(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis:",
            Self::Suggestions => "suggestions:",
            Self::Enhancement => "enhancement:",
            Self::Chat => "chat:",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = crate::error::GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "analysis" => Ok(Self::Analysis),
            "suggestions" => Ok(Self::Suggestions),
            "enhancement" => Ok(Self::Enhancement),
            "chat" => Ok(Self::Chat),
            other => Err(crate::error::GovernanceError::configuration(format!(
                "unknown operation class '{other}'"
            ))),
        }
    }
}
