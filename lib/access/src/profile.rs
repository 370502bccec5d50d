//! Application-level authorization records.
//!
//! A profile is created out-of-band when an account signs up (a database
//! trigger on the hosted backend) and keyed by the principal id. It is read on
//! every session change. Rows arrive as [`ProfileRecord`] and are validated
//! into a typed [`Profile`]; nothing is coerced to a default role.

use crate::role::{ApprovalStatus, Role};
use agency_portal_core::PrincipalId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    id: PrincipalId,
    role: Role,
    approval_status: Option<ApprovalStatus>,
    full_name: Option<String>,
    email: Option<String>,
    company: Option<String>,
    phone: Option<String>,
    access_reason: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Creates a profile with only the authorization fields set.
    #[must_use]
    pub fn new(id: PrincipalId, role: Role, approval_status: Option<ApprovalStatus>) -> Self {
        Self {
            id,
            role,
            approval_status,
            full_name: None,
            email: None,
            company: None,
            phone: None,
            access_reason: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Returns the principal this profile belongs to.
    #[must_use]
    pub fn id(&self) -> &PrincipalId {
        &self.id
    }

    /// Returns the profile's role.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the stored approval status, if any.
    #[must_use]
    pub fn approval_status(&self) -> Option<ApprovalStatus> {
        self.approval_status
    }

    /// Returns true if this is a client whose access has been approved.
    ///
    /// A client with no recorded status counts as not approved.
    #[must_use]
    pub fn is_approved_client(&self) -> bool {
        self.role == Role::Client && self.approval_status.is_some_and(|s| s.is_approved())
    }

    /// Returns the display name, if set.
    #[must_use]
    pub fn full_name(&self) -> Option<&str> {
        self.full_name.as_deref()
    }

    /// Returns the contact email, if set.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Returns the client's company, if set.
    #[must_use]
    pub fn company(&self) -> Option<&str> {
        self.company.as_deref()
    }

    /// Returns the phone number, if set.
    #[must_use]
    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    /// Returns the client's stated reason for requesting access, if set.
    #[must_use]
    pub fn access_reason(&self) -> Option<&str> {
        self.access_reason.as_deref()
    }

    /// Returns when the row was created, if the store reported it.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Returns when the row was last updated, if the store reported it.
    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

/// Why a stored row could not become a [`Profile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileValidationError {
    /// The role column is missing or holds an unknown value.
    InvalidRole { value: Option<String> },
    /// A client row holds an unknown approval status.
    InvalidApprovalStatus { value: String },
}

impl fmt::Display for ProfileValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRole { value: Some(value) } => {
                write!(f, "unrecognized role '{value}'")
            }
            Self::InvalidRole { value: None } => write!(f, "role is not set"),
            Self::InvalidApprovalStatus { value } => {
                write!(f, "unrecognized approval status '{value}'")
            }
        }
    }
}

impl std::error::Error for ProfileValidationError {}

/// A `profiles` row exactly as the data store returns it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub approval_status: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub access_reason: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProfileRecord {
    /// Creates a bare row with the given id, role and approval status.
    #[must_use]
    pub fn new(id: &PrincipalId, role: Option<&str>, approval_status: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            role: role.map(str::to_string),
            approval_status: approval_status.map(str::to_string),
            ..Self::default()
        }
    }

    /// Validates the row into a profile for `principal_id`.
    ///
    /// The row id is not re-checked: the store query is already filtered on
    /// the principal. Approval status is only validated for clients; other
    /// roles ignore whatever the column holds.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileValidationError`] if the role is missing or unknown,
    /// or a client's approval status is unknown.
    pub fn into_profile(
        self,
        principal_id: &PrincipalId,
    ) -> Result<Profile, ProfileValidationError> {
        let role = match self.role.as_deref() {
            Some(raw) => raw
                .parse::<Role>()
                .map_err(|_| ProfileValidationError::InvalidRole {
                    value: Some(raw.to_string()),
                })?,
            None => return Err(ProfileValidationError::InvalidRole { value: None }),
        };

        let approval_status = match (role, self.approval_status.as_deref()) {
            (Role::Client, Some(raw)) => Some(raw.parse::<ApprovalStatus>().map_err(|_| {
                ProfileValidationError::InvalidApprovalStatus {
                    value: raw.to_string(),
                }
            })?),
            (Role::Client, None) => Some(ApprovalStatus::Pending),
            _ => None,
        };

        Ok(Profile {
            id: principal_id.clone(),
            role,
            approval_status,
            full_name: self.full_name,
            email: self.email,
            company: self.company,
            phone: self.phone,
            access_reason: self.access_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
