//! Resource URI taxonomy.
//!
//! A small, fixed set of URI classes that every client of the kernel agrees
//! on. Keeping the taxonomy closed - the store accepts [`ResourceUri`], never
//! a raw string - is what lets the invariant auditor reason about all claims
//! generically.
//!
//! | Class | Meaning |
//! |---|---|
//! | `task://<project>/<id>` | Exclusive working rights on one task record |
//! | `workspace://<project>/<name>` | Exclusive rights to an isolated working copy; `default` names the shared trunk and doubles as the merge mutex |
//! | `agent://<project>/<slot>` | Occupancy of one numbered orchestrator slot |
//! | `message://<project>/<id>` | Marker that a trigger event has been processed |
//!
//! No other classes exist; adding one means updating this module and the
//! auditor together.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length for a project or resource name segment.
///
/// Bounds allocation when parsing URIs from untrusted input (store rows,
/// CLI arguments).
pub const MAX_SEGMENT_LEN: usize = 256;

/// Workspace name reserved for the shared trunk.
pub const TRUNK_WORKSPACE: &str = "default";

/// Errors produced when parsing or constructing a resource URI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum UriError {
    /// The scheme is not one of the four known classes.
    #[error("unknown resource class: {scheme}")]
    UnknownClass {
        /// The scheme that was not recognized.
        scheme: String,
    },

    /// The URI does not have the `scheme://project/name` shape.
    #[error("malformed resource uri: {uri}")]
    Malformed {
        /// The input that failed to parse.
        uri: String,
    },

    /// A segment is empty or exceeds [`MAX_SEGMENT_LEN`].
    #[error("invalid {segment} segment in resource uri: {reason}")]
    InvalidSegment {
        /// Which segment was invalid (`project` or `name`).
        segment: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// An `agent://` slot index is not a non-negative integer.
    #[error("invalid slot index in agent uri: {value}")]
    InvalidSlot {
        /// The value that failed to parse as a slot index.
        value: String,
    },
}

/// The class of a resource URI.
///
/// Used for prefix queries ([`crate::claim::ClaimStore::list`]) and for the
/// auditor's generic reasoning over all claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// `task://` - task record ownership.
    Task,
    /// `workspace://` - isolated working copy ownership.
    Workspace,
    /// `agent://` - numbered orchestrator slot occupancy.
    AgentSlot,
    /// `message://` - processed-event marker.
    Message,
}

impl ResourceClass {
    /// Returns the URI scheme for this class.
    #[must_use]
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Workspace => "workspace",
            Self::AgentSlot => "agent",
            Self::Message => "message",
        }
    }

    /// Returns the `scheme://` prefix used for store queries.
    #[must_use]
    pub fn uri_prefix(self) -> String {
        format!("{}://", self.scheme())
    }

    /// All classes, in taxonomy order.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [Self::Task, Self::Workspace, Self::AgentSlot, Self::Message]
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for ResourceClass {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "workspace" => Ok(Self::Workspace),
            "agent" => Ok(Self::AgentSlot),
            "message" => Ok(Self::Message),
            other => Err(UriError::UnknownClass {
                scheme: other.to_string(),
            }),
        }
    }
}

/// A parsed resource URI.
///
/// The closed set of coordinate-able resources. Construction always
/// validates, so any `ResourceUri` held by the kernel names a well-formed
/// resource in a known class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourceUri {
    /// Exclusive working rights on one task record.
    Task {
        /// Project the task belongs to.
        project: String,
        /// Task identifier within the project.
        id: String,
    },

    /// Exclusive rights to an isolated working copy.
    ///
    /// The name [`TRUNK_WORKSPACE`] is special: it names the single shared
    /// trunk, and its claim doubles as the merge mutex.
    Workspace {
        /// Project the workspace belongs to.
        project: String,
        /// Workspace name.
        name: String,
    },

    /// Occupancy of one numbered orchestrator slot.
    AgentSlot {
        /// Project the slot pool belongs to.
        project: String,
        /// Slot index, dense from 0 and bounded by the configured maximum.
        slot: u32,
    },

    /// Marker that a trigger event has been processed.
    Message {
        /// Project the event belongs to.
        project: String,
        /// Stable event identifier from the delivery channel.
        id: String,
    },
}

fn validate_segment(segment: &'static str, value: &str) -> Result<(), UriError> {
    if value.is_empty() {
        return Err(UriError::InvalidSegment {
            segment,
            reason: "must not be empty".to_string(),
        });
    }
    if value.len() > MAX_SEGMENT_LEN {
        return Err(UriError::InvalidSegment {
            segment,
            reason: format!("exceeds {MAX_SEGMENT_LEN} bytes"),
        });
    }
    if value.contains('/') {
        return Err(UriError::InvalidSegment {
            segment,
            reason: "must not contain '/'".to_string(),
        });
    }
    Ok(())
}

impl ResourceUri {
    /// Constructs a `task://` URI.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::InvalidSegment`] if a segment is empty, too long,
    /// or contains a path separator.
    pub fn task(project: &str, id: &str) -> Result<Self, UriError> {
        validate_segment("project", project)?;
        validate_segment("name", id)?;
        Ok(Self::Task {
            project: project.to_string(),
            id: id.to_string(),
        })
    }

    /// Constructs a `workspace://` URI.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::InvalidSegment`] if a segment is empty, too long,
    /// or contains a path separator.
    pub fn workspace(project: &str, name: &str) -> Result<Self, UriError> {
        validate_segment("project", project)?;
        validate_segment("name", name)?;
        Ok(Self::Workspace {
            project: project.to_string(),
            name: name.to_string(),
        })
    }

    /// Constructs the trunk workspace URI for a project.
    ///
    /// This is the merge mutex: staking it serializes trunk integration.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::InvalidSegment`] if the project segment is
    /// invalid.
    pub fn trunk(project: &str) -> Result<Self, UriError> {
        Self::workspace(project, TRUNK_WORKSPACE)
    }

    /// Constructs an `agent://` slot URI.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::InvalidSegment`] if the project segment is
    /// invalid.
    pub fn agent_slot(project: &str, slot: u32) -> Result<Self, UriError> {
        validate_segment("project", project)?;
        Ok(Self::AgentSlot {
            project: project.to_string(),
            slot,
        })
    }

    /// Constructs a `message://` URI.
    ///
    /// # Errors
    ///
    /// Returns [`UriError::InvalidSegment`] if a segment is empty, too long,
    /// or contains a path separator.
    pub fn message(project: &str, id: &str) -> Result<Self, UriError> {
        validate_segment("project", project)?;
        validate_segment("name", id)?;
        Ok(Self::Message {
            project: project.to_string(),
            id: id.to_string(),
        })
    }

    /// Returns the class of this URI.
    #[must_use]
    pub const fn class(&self) -> ResourceClass {
        match self {
            Self::Task { .. } => ResourceClass::Task,
            Self::Workspace { .. } => ResourceClass::Workspace,
            Self::AgentSlot { .. } => ResourceClass::AgentSlot,
            Self::Message { .. } => ResourceClass::Message,
        }
    }

    /// Returns the project segment.
    #[must_use]
    pub fn project(&self) -> &str {
        match self {
            Self::Task { project, .. }
            | Self::Workspace { project, .. }
            | Self::AgentSlot { project, .. }
            | Self::Message { project, .. } => project,
        }
    }

    /// Returns the resource name segment (task id, workspace name, slot
    /// index as text, or event id).
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Task { id, .. } | Self::Message { id, .. } => id.clone(),
            Self::Workspace { name, .. } => name.clone(),
            Self::AgentSlot { slot, .. } => slot.to_string(),
        }
    }

    /// Returns `true` if this is the trunk workspace (the merge mutex).
    #[must_use]
    pub fn is_trunk(&self) -> bool {
        matches!(self, Self::Workspace { name, .. } if name == TRUNK_WORKSPACE)
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task { project, id } => write!(f, "task://{project}/{id}"),
            Self::Workspace { project, name } => write!(f, "workspace://{project}/{name}"),
            Self::AgentSlot { project, slot } => write!(f, "agent://{project}/{slot}"),
            Self::Message { project, id } => write!(f, "message://{project}/{id}"),
        }
    }
}

impl FromStr for ResourceUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s.split_once("://").ok_or_else(|| UriError::Malformed {
            uri: s.to_string(),
        })?;
        let class = ResourceClass::from_str(scheme)?;
        let (project, name) = rest.split_once('/').ok_or_else(|| UriError::Malformed {
            uri: s.to_string(),
        })?;
        match class {
            ResourceClass::Task => Self::task(project, name),
            ResourceClass::Workspace => Self::workspace(project, name),
            ResourceClass::Message => Self::message(project, name),
            ResourceClass::AgentSlot => {
                validate_segment("project", project)?;
                let slot = name.parse::<u32>().map_err(|_| UriError::InvalidSlot {
                    value: name.to_string(),
                })?;
                Self::agent_slot(project, slot)
            },
        }
    }
}

impl TryFrom<String> for ResourceUri {
    type Error = UriError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceUri> for String {
    fn from(uri: ResourceUri) -> Self {
        uri.to_string()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_display_round_trip() {
        let uris = [
            ResourceUri::task("proj", "t1").unwrap(),
            ResourceUri::workspace("proj", "ws-alpha").unwrap(),
            ResourceUri::trunk("proj").unwrap(),
            ResourceUri::agent_slot("proj", 3).unwrap(),
            ResourceUri::message("proj", "msg-42").unwrap(),
        ];
        for uri in uris {
            let parsed: ResourceUri = uri.to_string().parse().unwrap();
            assert_eq!(parsed, uri);
        }
    }

    #[test]
    fn test_trunk_detection() {
        assert!(ResourceUri::trunk("p").unwrap().is_trunk());
        assert!(!ResourceUri::workspace("p", "feature-x").unwrap().is_trunk());
        assert!(!ResourceUri::task("p", "default").unwrap().is_trunk());
    }

    #[test]
    fn test_unknown_class_rejected() {
        let err = "lock://proj/thing".parse::<ResourceUri>().unwrap_err();
        assert!(matches!(err, UriError::UnknownClass { .. }));
    }

    #[test]
    fn test_malformed_rejected() {
        for bad in ["task://", "task://proj", "no-scheme", "task:proj/t1", ""] {
            assert!(bad.parse::<ResourceUri>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_empty_segments_rejected() {
        assert!("task:///t1".parse::<ResourceUri>().is_err());
        assert!("task://proj/".parse::<ResourceUri>().is_err());
    }

    #[test]
    fn test_slot_must_be_integer() {
        let err = "agent://proj/three".parse::<ResourceUri>().unwrap_err();
        assert!(matches!(err, UriError::InvalidSlot { .. }));
        // Extra path segments land in the slot field and are rejected.
        assert!("agent://proj/1/2".parse::<ResourceUri>().is_err());
    }

    #[test]
    fn test_oversized_segment_rejected() {
        let long = "x".repeat(MAX_SEGMENT_LEN + 1);
        assert!(ResourceUri::task(&long, "t1").is_err());
        assert!(ResourceUri::task("proj", &long).is_err());
    }

    #[test]
    fn test_serde_uses_string_form() {
        let uri = ResourceUri::task("proj", "t1").unwrap();
        let json = serde_json::to_string(&uri).unwrap();
        assert_eq!(json, "\"task://proj/t1\"");
        let back: ResourceUri = serde_json::from_str(&json).unwrap();
        assert_eq!(back, uri);
    }

    proptest! {
        #[test]
        fn prop_valid_segments_round_trip(
            project in "[a-zA-Z0-9_.-]{1,32}",
            name in "[a-zA-Z0-9_.-]{1,32}",
            slot in 0u32..1024,
        ) {
            let task = ResourceUri::task(&project, &name).unwrap();
            prop_assert_eq!(task.to_string().parse::<ResourceUri>().unwrap(), task);

            let ws = ResourceUri::workspace(&project, &name).unwrap();
            prop_assert_eq!(ws.to_string().parse::<ResourceUri>().unwrap(), ws);

            let agent = ResourceUri::agent_slot(&project, slot).unwrap();
            prop_assert_eq!(agent.to_string().parse::<ResourceUri>().unwrap(), agent);

            let msg = ResourceUri::message(&project, &name).unwrap();
            prop_assert_eq!(msg.to_string().parse::<ResourceUri>().unwrap(), msg);
        }
    }
}
