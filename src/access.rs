//! Tool access control
//!
//! Callers come in three tiers. Which tools a tier may use is decided by an
//! [`AccessPolicy`]; the filter here only applies it, keeping proposed order.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::llm::types::{CompletedToolCall, ProposedToolCall, ToolDefinition};

/// Reason attached to every denial
pub const ACCESS_DENIED_REASON: &str = "Access denied for your role";

/// Caller tier, most privileged first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Owner,
    Collaborator,
    #[default]
    Visitor,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessLevel::Owner => "owner",
            AccessLevel::Collaborator => "collaborator",
            AccessLevel::Visitor => "visitor",
        };
        write!(f, "{}", s)
    }
}

/// Decides whether a tier may use a tool
pub trait AccessPolicy: Send + Sync {
    fn can_access(&self, tool_name: &str, level: AccessLevel) -> bool;

    /// Subset of `tools` to advertise to a caller at `level`
    fn tools_for_level(&self, tools: &[ToolDefinition], level: AccessLevel) -> Vec<ToolDefinition> {
        tools
            .iter()
            .filter(|tool| self.can_access(&tool.name, level))
            .cloned()
            .collect()
    }
}

/// Owners get every tool; collaborators get their set plus the visitor set.
#[derive(Debug, Clone, Default)]
pub struct TieredPolicy {
    visitor_tools: BTreeSet<String>,
    collaborator_tools: BTreeSet<String>,
}

impl TieredPolicy {
    pub fn new<V, C>(visitor_tools: V, collaborator_tools: C) -> Self
    where
        V: IntoIterator,
        V::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            visitor_tools: visitor_tools.into_iter().map(Into::into).collect(),
            collaborator_tools: collaborator_tools.into_iter().map(Into::into).collect(),
        }
    }
}

impl AccessPolicy for TieredPolicy {
    fn can_access(&self, tool_name: &str, level: AccessLevel) -> bool {
        match level {
            AccessLevel::Owner => true,
            AccessLevel::Collaborator => {
                self.collaborator_tools.contains(tool_name) || self.visitor_tools.contains(tool_name)
            }
            AccessLevel::Visitor => self.visitor_tools.contains(tool_name),
        }
    }
}

/// Identity of whoever started a turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: Option<String>,
    pub access_level: AccessLevel,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, access_level: AccessLevel) -> Self {
        Self {
            user_id: Some(user_id.into()),
            access_level,
        }
    }

    /// Unauthenticated visitor
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_owner(&self) -> bool {
        self.access_level == AccessLevel::Owner
    }
}

/// Compare secrets without leaking the mismatch position through timing.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    // ct_eq only compares equal-length slices
    a.len() == b.len() && a.ct_eq(b).into()
}

/// Anything that names the tool it wants to call
pub trait NamedCall {
    fn tool_name(&self) -> &str;
}

impl NamedCall for ProposedToolCall {
    fn tool_name(&self) -> &str {
        &self.name
    }
}

impl NamedCall for CompletedToolCall {
    fn tool_name(&self) -> &str {
        self.name()
    }
}

impl<T: NamedCall> NamedCall for (usize, T) {
    fn tool_name(&self) -> &str {
        self.1.tool_name()
    }
}

/// Calls split by the policy, each side in proposed order
#[derive(Debug, Clone, PartialEq)]
pub struct AccessPartition<T> {
    pub permitted: Vec<T>,
    pub denied: Vec<T>,
}

/// Partition proposed calls for a caller. Pure; nothing is executed.
pub fn filter_tool_calls<T: NamedCall>(
    calls: Vec<T>,
    level: AccessLevel,
    policy: &dyn AccessPolicy,
) -> AccessPartition<T> {
    let (permitted, denied) = calls
        .into_iter()
        .partition(|call| policy.can_access(call.tool_name(), level));
    AccessPartition { permitted, denied }
}
