use crate::constants::DEFAULT_CHANGE_SOURCE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered account holder, one row of `users`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String, // Stored credential, hashing happens before it reaches the store
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub contact_info: Option<String>,
    pub registration_time: DateTime<Utc>,
    pub last_login_time: Option<DateTime<Utc>>,
}

/// Registration request. Optional fields left as `None` take the column defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub contact_info: Option<String>,
}

impl NewUser {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    pub fn with_avatar_url(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }

    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = Some(bio.into());
        self
    }

    pub fn with_contact_info(mut self, contact_info: impl Into<String>) -> Self {
        self.contact_info = Some(contact_info.into());
        self
    }
}

/// Profile edit. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub bio: Option<String>,
    pub contact_info: Option<String>,
    pub avatar_url: Option<String>,
}

/// A content item authored by a user, one row of `user_works`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserWork {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub body: Option<String>,
    pub created: DateTime<Utc>,
}

/// A work joined with its author's current username.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkWithAuthor {
    #[serde(flatten)]
    pub work: UserWork,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWork {
    pub author_id: i64,
    pub title: String,
    pub body: Option<String>,
}

/// Audit record of one profile field change, one row of `profile_change_log`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileChange {
    pub log_id: i64,
    pub user_id: i64,
    pub changed_field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub change_time: DateTime<Utc>,
    pub change_source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProfileChange {
    pub user_id: i64,
    pub changed_field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// `None` lets the column default (`"user"`) apply
    pub change_source: Option<ChangeSource>,
}

/// Where a profile change originated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    User,
    Admin,
    System,
}

impl Default for ChangeSource {
    fn default() -> Self {
        Self::User
    }
}

impl ChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => DEFAULT_CHANGE_SOURCE,
            Self::Admin => "admin",
            Self::System => "system",
        }
    }
}

/// Profile columns whose edits are written to the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedField {
    Username,
    Bio,
    ContactInfo,
    AvatarUrl,
}

impl TrackedField {
    pub const ALL: [TrackedField; 4] = [
        TrackedField::Username,
        TrackedField::Bio,
        TrackedField::ContactInfo,
        TrackedField::AvatarUrl,
    ];

    /// Column name, also the value stored in `changed_field`.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::Bio => "bio",
            Self::ContactInfo => "contact_info",
            Self::AvatarUrl => "avatar_url",
        }
    }

    pub fn requested<'a>(&self, update: &'a ProfileUpdate) -> Option<&'a str> {
        match self {
            Self::Username => update.username.as_deref(),
            Self::Bio => update.bio.as_deref(),
            Self::ContactInfo => update.contact_info.as_deref(),
            Self::AvatarUrl => update.avatar_url.as_deref(),
        }
    }

    pub fn current<'a>(&self, user: &'a User) -> Option<&'a str> {
        match self {
            Self::Username => Some(user.username.as_str()),
            Self::Bio => user.bio.as_deref(),
            Self::ContactInfo => user.contact_info.as_deref(),
            Self::AvatarUrl => user.avatar_url.as_deref(),
        }
    }
}
