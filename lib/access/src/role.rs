//! Role and approval types for portal access control.
//!
//! Every profile carries exactly one role. Clients additionally carry an
//! approval status that gates the client portal beyond mere sign-in.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Portal role stored on a profile.
///
/// Only administrators change a role; end users never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Agency administrator with access to the admin portal.
    Admin,
    /// Agency staff member.
    Employee,
    /// External client with access to the client portal once approved.
    Client,
}

impl Role {
    /// All known roles, in declaration order.
    pub const ALL: [Role; 3] = [Role::Admin, Role::Employee, Role::Client];

    /// Returns the wire name of this role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Employee => "employee",
            Self::Client => "client",
        }
    }

    /// Returns true if this role has admin privileges.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Returns true if access for this role depends on an approval decision.
    #[must_use]
    pub fn requires_approval(&self) -> bool {
        matches!(self, Self::Client)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored role or approval value is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownValue {
    /// Which field was being parsed.
    pub field: &'static str,
    /// The raw value found in storage.
    pub value: String,
}

impl fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized {} value '{}'", self.field, self.value)
    }
}

impl std::error::Error for UnknownValue {}

impl FromStr for Role {
    type Err = UnknownValue;

    /// Parses a stored role. Matching is exact (after trimming); casing
    /// variants are configuration errors rather than aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "admin" => Ok(Self::Admin),
            "employee" => Ok(Self::Employee),
            "client" => Ok(Self::Client),
            other => Err(UnknownValue {
                field: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// Approval decision for a client account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Awaiting an administrator decision.
    Pending,
    /// Cleared to use the client portal.
    Approved,
    /// Access refused. Stored as `denied` by some writers.
    #[serde(alias = "denied")]
    Rejected,
}

impl ApprovalStatus {
    /// Returns the wire name of this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Returns true if the account has been approved.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" | "denied" => Ok(Self::Rejected),
            other => Err(UnknownValue {
                field: "approval_status",
                value: other.to_string(),
            }),
        }
    }
}
