use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Platform role of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Guest,
    Member,
    Moderator,
    Admin,
}

impl Role {
    /// Unknown or missing roles fall back to `guest`.
    pub fn parse_lossy(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            Some("member") => Role::Member,
            Some("moderator") => Role::Moderator,
            Some("admin") => Role::Admin,
            _ => Role::Guest,
        }
    }
}

/// User record as returned by the backend procedures. Every field is
/// optional because the procedures return loosely shaped JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "display_name")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default, alias = "email_verified")]
    pub email_verified: Option<bool>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub skills: Option<Vec<String>>,
    #[serde(default)]
    pub badges: Option<Vec<String>>,
    #[serde(default, alias = "created_at", with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, alias = "last_active_at", with = "time::serde::rfc3339::option")]
    pub last_active_at: Option<OffsetDateTime>,
}

/// Normalized user carried by sessions and the client cache. Every field
/// has a concrete value so consumers never check for absence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub avatar: Option<String>,
    pub email_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_active_at: OffsetDateTime,
    pub bio: Option<String>,
    pub skills: Vec<String>,
    pub badges: Vec<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl SessionUser {
    /// Fill every optional backend field with its explicit default.
    pub fn from_record(record: UserRecord) -> Self {
        let username = record.username.unwrap_or_default();
        let display_name = non_empty(record.display_name).unwrap_or_else(|| username.clone());
        Self {
            id: record.id.unwrap_or_default(),
            email: record.email.unwrap_or_default(),
            role: Role::parse_lossy(record.role.as_deref()),
            avatar: non_empty(record.avatar),
            email_verified: record.email_verified.unwrap_or(false),
            last_active_at: record
                .last_active_at
                .unwrap_or_else(OffsetDateTime::now_utc),
            bio: non_empty(record.bio),
            skills: record.skills.unwrap_or_default(),
            badges: record.badges.unwrap_or_default(),
            display_name,
            username,
        }
    }
}

impl From<UserRecord> for SessionUser {
    fn from(record: UserRecord) -> Self {
        SessionUser::from_record(record)
    }
}
