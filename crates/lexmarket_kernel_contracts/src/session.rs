#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::common::validate_path_token;
use crate::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for UserId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_path_token("user_id", &self.0, 64)
    }
}

impl TryFrom<String> for UserId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Lawyer,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Lawyer => "lawyer",
        }
    }

    pub const fn all() -> &'static [Self] {
        &[Self::Client, Self::Lawyer]
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "client" => Some(Self::Client),
            "lawyer" => Some(Self::Lawyer),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bearer token minted by the backend at login/signup.
///
/// `Debug` never prints the raw value; use [`SessionToken::fingerprint`] when a
/// log line needs to correlate sessions.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(raw: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(raw.into().trim().to_string());
        v.validate()?;
        Ok(v)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        digest
            .iter()
            .take(6)
            .map(|b| format!("{b:02x}"))
            .collect::<String>()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken(fp={})", self.fingerprint())
    }
}

impl Validate for SessionToken {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.0.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "session_token",
                reason: "must not be empty",
            });
        }
        if self.0.len() > 4096 {
            return Err(ContractViolation::InvalidValue {
                field: "session_token",
                reason: "must be <= 4096 chars",
            });
        }
        if self.0.chars().any(|c| c.is_ascii_whitespace() || c.is_control()) {
            return Err(ContractViolation::InvalidValue {
                field: "session_token",
                reason: "must not contain whitespace",
            });
        }
        Ok(())
    }
}

impl TryFrom<String> for SessionToken {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionToken> for String {
    fn from(value: SessionToken) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    pub role: Role,
}

impl UserProfile {
    /// Navbar greeting: the display name when present, the email otherwise.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => &self.email,
        }
    }
}

impl Validate for UserProfile {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        if self.email.trim().is_empty() || !self.email.contains('@') {
            return Err(ContractViolation::InvalidValue {
                field: "user_profile.email",
                reason: "must be an email address",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: SessionToken,
    pub user: UserProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

impl LoginInput {
    pub fn v1(email: impl Into<String>, password: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self {
            email: email.into().trim().to_string(),
            password: password.into(),
        };
        v.validate()?;
        Ok(v)
    }
}

impl Validate for LoginInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.email.is_empty() || !self.email.contains('@') {
            return Err(ContractViolation::InvalidValue {
                field: "login.email",
                reason: "must be an email address",
            });
        }
        if self.password.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "login.password",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

/// Signup form body. Lawyers additionally declare jurisdiction and bar number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignupInput {
    pub email: String,
    pub password: String,
    pub name: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bar_number: Option<String>,
}

impl SignupInput {
    pub fn client_v1(
        email: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, ContractViolation> {
        let v = Self {
            email: email.into().trim().to_string(),
            password: password.into(),
            name: name.into().trim().to_string(),
            role: Role::Client,
            jurisdiction: None,
            bar_number: None,
        };
        v.validate()?;
        Ok(v)
    }

    pub fn lawyer_v1(
        email: impl Into<String>,
        password: impl Into<String>,
        name: impl Into<String>,
        jurisdiction: impl Into<String>,
        bar_number: impl Into<String>,
    ) -> Result<Self, ContractViolation> {
        let v = Self {
            email: email.into().trim().to_string(),
            password: password.into(),
            name: name.into().trim().to_string(),
            role: Role::Lawyer,
            jurisdiction: Some(jurisdiction.into().trim().to_string()),
            bar_number: Some(bar_number.into().trim().to_string()),
        };
        v.validate()?;
        Ok(v)
    }
}

impl Validate for SignupInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        LoginInput {
            email: self.email.clone(),
            password: self.password.clone(),
        }
        .validate()?;
        if self.name.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "signup.name",
                reason: "must not be empty",
            });
        }
        match self.role {
            Role::Client => {
                if self.jurisdiction.is_some() || self.bar_number.is_some() {
                    return Err(ContractViolation::InvalidValue {
                        field: "signup.role",
                        reason: "client signup must not carry lawyer credentials",
                    });
                }
            }
            Role::Lawyer => {
                for (field, value) in [
                    ("signup.jurisdiction", &self.jurisdiction),
                    ("signup.bar_number", &self.bar_number),
                ] {
                    if value.as_deref().map_or(true, str::is_empty) {
                        return Err(ContractViolation::MissingField { field });
                    }
                }
            }
        }
        Ok(())
    }
}
