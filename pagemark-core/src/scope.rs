//! Linked-context scope under which a markup set is loaded and saved.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkedType {
    Project,
    Area,
    Task,
}

impl LinkedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkedType::Project => "project",
            LinkedType::Area => "area",
            LinkedType::Task => "task",
        }
    }
}

impl fmt::Display for LinkedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkedType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "project" => Ok(LinkedType::Project),
            "area" => Ok(LinkedType::Area),
            "task" => Ok(LinkedType::Task),
            other => Err(format!("unknown linked type {other:?}; use project, area, or task")),
        }
    }
}

/// A specific linked entity. Document-level scope is `Option::<LinkedContext>::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkedContext {
    pub linked_type: LinkedType,
    pub linked_id: i64,
}

impl LinkedContext {
    pub fn new(linked_type: LinkedType, linked_id: i64) -> Self {
        Self {
            linked_type,
            linked_id,
        }
    }
}

impl fmt::Display for LinkedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.linked_type, self.linked_id)
    }
}

/// One entry of the document's link list as reported by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkOption {
    pub linked_type: LinkedType,
    pub linked_id: i64,
    #[serde(default)]
    pub title: String,
}

impl LinkOption {
    pub fn context(&self) -> LinkedContext {
        LinkedContext::new(self.linked_type, self.linked_id)
    }
}

/// Outcome of checking a requested scope against the document's links.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeResolution {
    /// No scope was requested.
    DocumentLevel,
    /// The requested scope is linked to the document.
    Validated(LinkedContext),
    /// The requested scope is not among the document's links.
    Reset { requested: LinkedContext },
    /// The link list could not be fetched, so the scope could not be checked.
    Unverified { requested: LinkedContext, reason: String },
}

impl ScopeResolution {
    /// Scope the session should actually use. Anything that was not
    /// positively validated falls back to document level.
    pub fn effective(&self) -> Option<LinkedContext> {
        match self {
            ScopeResolution::Validated(context) => Some(*context),
            ScopeResolution::DocumentLevel
            | ScopeResolution::Reset { .. }
            | ScopeResolution::Unverified { .. } => None,
        }
    }

    /// Whether the session's history must be dropped because it belonged to
    /// a scope that is no longer in effect.
    pub fn discards_history(&self) -> bool {
        matches!(
            self,
            ScopeResolution::Reset { .. } | ScopeResolution::Unverified { .. }
        )
    }
}

pub fn resolve_scope(
    requested: Option<LinkedContext>,
    links: Result<&[LinkOption], &ApiError>,
) -> ScopeResolution {
    let Some(requested) = requested else {
        return ScopeResolution::DocumentLevel;
    };
    match links {
        Ok(links) if links.iter().any(|link| link.context() == requested) => {
            ScopeResolution::Validated(requested)
        }
        Ok(_) => {
            info!(scope = %requested, "requested scope is not linked to this document; using document level");
            ScopeResolution::Reset { requested }
        }
        Err(err) => {
            warn!(scope = %requested, %err, "could not verify requested scope; using document level");
            ScopeResolution::Unverified {
                requested,
                reason: err.to_string(),
            }
        }
    }
}
