use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Buffer before access token expiry at which a session counts as stale.
const ACCESS_REFRESH_BUFFER_SECS: i64 = 60;

/// Snapshot of the tokens currently held by a `TokenStore`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Session {
    pub access_token: String,
    pub access_token_expiry: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expiry: DateTime<Utc>,
}

impl Session {
    /// The access token must always expire before the refresh token.
    pub fn is_consistent(&self) -> bool {
        self.access_token_expiry < self.refresh_token_expiry
    }

    pub fn is_access_expired(&self) -> bool {
        Utc::now() >= self.access_token_expiry
    }

    pub fn is_refresh_expired(&self) -> bool {
        Utc::now() >= self.refresh_token_expiry
    }

    /// Whether the access token expires within the next minute.
    pub fn needs_refresh(&self) -> bool {
        Utc::now() + Duration::seconds(ACCESS_REFRESH_BUFFER_SECS) >= self.access_token_expiry
    }

    /// Get minutes remaining until the access token expires (for display)
    pub fn minutes_until_access_expiry(&self) -> i64 {
        (self.access_token_expiry - Utc::now()).num_minutes().max(0)
    }

    pub fn days_until_refresh_expiry(&self) -> i64 {
        (self.refresh_token_expiry - Utc::now()).num_days().max(0)
    }
}

/// Token pair as returned by the login and refresh endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Role attached to a backend account.
///
/// Unknown roles are kept verbatim so that comparisons against a required
/// role stay exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    User,
    Admin,
    Other(String),
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "USER" => Role::User,
            "ADMIN" => Role::Admin,
            _ => Role::Other(value),
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::from(value.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::User => "USER".to_string(),
            Role::Admin => "ADMIN".to_string(),
            Role::Other(other) => other,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("USER"),
            Role::Admin => f.write_str("ADMIN"),
            Role::Other(other) => f.write_str(other),
        }
    }
}

/// The account behind the current access token, as reported by the
/// "who am I" endpoint. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct AuthenticatedUser {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[cfg_attr(feature = "ts", ts(type = "string"))]
    pub role: Role,
    #[serde(default, alias = "name", alias = "fullName")]
    pub display_name: Option<String>,
    /// Remaining profile fields, passed through untouched
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub profile: serde_json::Map<String, serde_json::Value>,
}

impl AuthenticatedUser {
    pub fn has_role(&self, role: &Role) -> bool {
        &self.role == role
    }

    pub fn display_name_or_id(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }
}

/// Backends send ids as numbers or strings depending on the table.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}
