//! Caller identity
//!
//! Every engine operation takes a [`RequestContext`]; the tenant in it is
//! the only tenant the call may read or write.

use casework_audit::{Actor, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Reviewer,
    Member,
    Viewer,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Reviewer => "reviewer",
            Self::Member => "member",
            Self::Viewer => "viewer",
        }
    }

    /// May add facts, missing elements, risks and request transitions
    #[must_use]
    pub const fn can_mutate(self) -> bool {
        !matches!(self, Self::Viewer)
    }

    /// May validate a case and confirm duplicate links
    #[must_use]
    pub const fn can_review(self) -> bool {
        matches!(self, Self::Admin | Self::Reviewer)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "reviewer" => Ok(Self::Reviewer),
            "member" => Ok(Self::Member),
            "viewer" => Ok(Self::Viewer),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Authenticated caller of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: String,
    pub tenant_id: TenantId,
    pub role: Role,
}

impl RequestContext {
    #[must_use]
    pub fn new(user_id: impl Into<String>, tenant_id: TenantId, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id,
            role,
        }
    }

    /// Audit actor for changes made by this caller
    #[must_use]
    pub fn actor(&self) -> Actor {
        Actor::user(self.user_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_capabilities() {
        assert!(Role::Member.can_mutate());
        assert!(!Role::Member.can_review());
        assert!(Role::Reviewer.can_review());
        assert!(!Role::Viewer.can_mutate());
        assert_eq!(" Admin ".parse::<Role>().unwrap(), Role::Admin);
        assert!("root".parse::<Role>().is_err());
    }
}
