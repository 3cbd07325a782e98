//! Shared constants used across the store.

// Database file
pub const DB_FILE: &str = "userworks.sqlite";
pub const DB_PATH_ENV: &str = "USERWORKS_DB_PATH";
pub const LOG_LEVEL_ENV: &str = "USERWORKS_LOG";
pub const DEFAULT_LOG_LEVEL: &str = "info";

// Table names
pub const USERS_TABLE: &str = "users";
pub const USER_WORKS_TABLE: &str = "user_works";
pub const PROFILE_CHANGE_LOG_TABLE: &str = "profile_change_log";

// Column defaults
pub const DEFAULT_AVATAR_URL: &str = "default_avatar.png";
pub const DEFAULT_CHANGE_SOURCE: &str = "user";

// Column length limits, enforced by CHECK constraints
pub const USERNAME_MAX_LEN: usize = 50;
pub const PASSWORD_MAX_LEN: usize = 255;
pub const AVATAR_URL_MAX_LEN: usize = 500;
pub const CONTACT_INFO_MAX_LEN: usize = 200;
pub const TITLE_MAX_LEN: usize = 200;
pub const CHANGED_FIELD_MAX_LEN: usize = 50;
pub const CHANGE_SOURCE_MAX_LEN: usize = 20;

// Nickname availability window used by the profile editor
pub const NICKNAME_MIN_CHARS: usize = 1;
pub const NICKNAME_MAX_CHARS: usize = 20;

// Zone-less timestamp layouts; `%.f` also matches a missing fraction
pub const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];
