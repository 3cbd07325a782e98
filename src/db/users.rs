use crate::constants::{NICKNAME_MAX_CHARS, NICKNAME_MIN_CHARS};
use crate::db::core::{optional_timestamp_at, timestamp_at, DbState};
use crate::db::profile_log;
use crate::error::{StoreError, StoreResult};
use crate::models::{ChangeSource, NewProfileChange, NewUser, ProfileChange, ProfileUpdate, TrackedField, User};
use rusqlite::types::ToSql;
use rusqlite::{params, Connection, OptionalExtension, Row};

const USER_COLUMNS: &str = "user_id, username, password, avatar_url, bio, contact_info, registration_time, last_login_time";

fn map_user(row: &Row) -> rusqlite::Result<User> {
  Ok(User {
    user_id: row.get(0)?,
    username: row.get(1)?,
    password: row.get(2)?,
    avatar_url: row.get(3)?,
    bio: row.get(4)?,
    contact_info: row.get(5)?,
    registration_time: timestamp_at(row, 6)?,
    last_login_time: optional_timestamp_at(row, 7)?,
  })
}

pub(crate) fn fetch_user(conn: &Connection, user_id: i64) -> StoreResult<Option<User>> {
  let sql = format!("SELECT {} FROM users WHERE user_id = ?1", USER_COLUMNS);
  Ok(conn.query_row(&sql, params![user_id], map_user).optional()?)
}

/// Registers a new user and returns its `user_id`.
///
/// Only the optional fields that are set are written, so the rest pick up
/// their column defaults.
pub fn insert_user(state: &DbState, new_user: &NewUser) -> StoreResult<i64> {
  let mut columns = vec!["username", "password"];
  let mut values: Vec<&dyn ToSql> = vec![&new_user.username, &new_user.password];
  if let Some(avatar_url) = &new_user.avatar_url {
    columns.push("avatar_url");
    values.push(avatar_url);
  }
  if let Some(bio) = &new_user.bio {
    columns.push("bio");
    values.push(bio);
  }
  if let Some(contact_info) = &new_user.contact_info {
    columns.push("contact_info");
    values.push(contact_info);
  }

  let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
  let sql = format!(
    "INSERT INTO users ({}) VALUES ({})",
    columns.join(", "),
    placeholders.join(", ")
  );

  state.with_conn(|conn| {
    conn.execute(&sql, values.as_slice())?;
    let user_id = conn.last_insert_rowid();
    log::info!("[db] Registered user {} as {}", new_user.username, user_id);
    Ok(user_id)
  })
}

pub fn get_user(state: &DbState, user_id: i64) -> StoreResult<Option<User>> {
  state.with_conn(|conn| fetch_user(conn, user_id))
}

pub fn get_user_by_username(state: &DbState, username: &str) -> StoreResult<Option<User>> {
  state.with_conn(|conn| {
    let sql = format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS);
    Ok(conn.query_row(&sql, params![username], map_user).optional()?)
  })
}

/// Stamps `last_login_time` with the current time.
pub fn record_login(state: &DbState, user_id: i64) -> StoreResult<()> {
  state.with_conn(|conn| {
    let updated = conn.execute(
      "UPDATE users SET last_login_time = CURRENT_TIMESTAMP WHERE user_id = ?1",
      params![user_id],
    )?;
    if updated == 0 {
      return Err(StoreError::not_found("User", user_id));
    }
    log::debug!("[db] Recorded login for user {}", user_id);
    Ok(())
  })
}

/// Whether `candidate` could be taken as a username by `exclude_user_id`.
///
/// The candidate is trimmed and must be 1-20 characters; the excluded
/// user's own name counts as available.
pub fn is_username_available(
  state: &DbState,
  candidate: &str,
  exclude_user_id: Option<i64>,
) -> StoreResult<bool> {
  let candidate = candidate.trim();
  let chars = candidate.chars().count();
  if !(NICKNAME_MIN_CHARS..=NICKNAME_MAX_CHARS).contains(&chars) {
    return Ok(false);
  }

  state.with_conn(|conn| {
    let taken: Option<i64> = conn
      .query_row(
        "SELECT user_id FROM users WHERE username = ?1 AND user_id IS NOT ?2",
        params![candidate, exclude_user_id],
        |row| row.get(0),
      )
      .optional()?;
    Ok(taken.is_none())
  })
}

/// Applies a profile edit and logs every field whose value actually changed.
///
/// The column updates and their change log rows commit together; if any
/// write fails (e.g. the new username is taken) nothing is kept.
pub fn update_profile(
  state: &DbState,
  user_id: i64,
  update: &ProfileUpdate,
  source: ChangeSource,
) -> StoreResult<Vec<ProfileChange>> {
  state.with_conn(|conn| {
    let tx = conn.unchecked_transaction()?;

    let user = fetch_user(&tx, user_id)?.ok_or_else(|| StoreError::not_found("User", user_id))?;

    let mut log_ids = Vec::new();
    for field in TrackedField::ALL {
      let Some(new_value) = field.requested(update) else {
        continue;
      };
      let old_value = field.current(&user);
      if old_value == Some(new_value) {
        continue;
      }

      tx.execute(
        &format!("UPDATE users SET {} = ?1 WHERE user_id = ?2", field.column()),
        params![new_value, user_id],
      )?;
      let log_id = profile_log::append_change_tx(
        &tx,
        &NewProfileChange {
          user_id,
          changed_field: field.column().to_string(),
          old_value: old_value.map(str::to_string),
          new_value: Some(new_value.to_string()),
          change_source: Some(source),
        },
      )?;
      log_ids.push(log_id);
    }

    let changes = log_ids
      .into_iter()
      .map(|log_id| profile_log::fetch_change(&tx, log_id))
      .collect::<StoreResult<Vec<_>>>()?;

    tx.commit()?;
    log::info!(
      "[db] Updated profile of user {} ({} field(s) changed)",
      user_id,
      changes.len()
    );
    Ok(changes)
  })
}

pub fn count_users(state: &DbState) -> StoreResult<i64> {
  state.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::constants::{
    AVATAR_URL_MAX_LEN, CONTACT_INFO_MAX_LEN, DEFAULT_AVATAR_URL, PASSWORD_MAX_LEN, USERNAME_MAX_LEN,
  };
  use crate::db::core::execute_sql;
  use crate::db::profile_log::list_changes_for_user;
  use chrono::Utc;

  fn state() -> DbState {
    DbState::open_in_memory().unwrap()
  }

  #[test]
  fn test_defaults_applied_on_registration() {
    let state = state();
    let before = Utc::now() - chrono::Duration::seconds(2);
    let user_id = insert_user(&state, &NewUser::new("ada", "hash")).unwrap();

    let user = get_user(&state, user_id).unwrap().unwrap();
    assert_eq!(user.username, "ada");
    assert_eq!(user.password, "hash");
    assert_eq!(user.avatar_url.as_deref(), Some(DEFAULT_AVATAR_URL));
    assert_eq!(user.bio.as_deref(), Some(""));
    assert_eq!(user.contact_info.as_deref(), Some(""));
    assert!(user.registration_time >= before);
    assert!(user.last_login_time.is_none());
  }

  #[test]
  fn test_explicit_optional_fields_kept() {
    let state = state();
    let user_id = insert_user(
      &state,
      &NewUser::new("grace", "hash")
        .with_avatar_url("avatars/2.png")
        .with_bio("compilers")
        .with_contact_info("grace@example.com"),
    )
    .unwrap();

    let user = get_user_by_username(&state, "grace").unwrap().unwrap();
    assert_eq!(user.user_id, user_id);
    assert_eq!(user.avatar_url.as_deref(), Some("avatars/2.png"));
    assert_eq!(user.bio.as_deref(), Some("compilers"));
    assert_eq!(user.contact_info.as_deref(), Some("grace@example.com"));
  }

  #[test]
  fn test_duplicate_username_rejected() {
    let state = state();
    insert_user(&state, &NewUser::new("ada", "hash")).unwrap();
    let err = insert_user(&state, &NewUser::new("ada", "other")).unwrap_err();
    match err {
      StoreError::UniqueViolation { constraint } => assert_eq!(constraint, "users.username"),
      other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(count_users(&state).unwrap(), 1);
  }

  #[test]
  fn test_oversized_username_rejected() {
    let state = state();
    let long_name = "x".repeat(USERNAME_MAX_LEN + 1);
    let err = insert_user(&state, &NewUser::new(long_name, "hash")).unwrap_err();
    assert!(matches!(
      err,
      StoreError::CheckViolation { ref constraint } if constraint == "users_username_len"
    ));

    let exact = "x".repeat(USERNAME_MAX_LEN);
    assert!(insert_user(&state, &NewUser::new(exact, "hash")).is_ok());
  }

  #[test]
  fn test_column_length_limits() {
    let state = state();
    let cases = [
      (
        NewUser::new("p", "x".repeat(PASSWORD_MAX_LEN + 1)),
        "users_password_len",
      ),
      (
        NewUser::new("a", "hash").with_avatar_url("x".repeat(AVATAR_URL_MAX_LEN + 1)),
        "users_avatar_url_len",
      ),
      (
        NewUser::new("c", "hash").with_contact_info("x".repeat(CONTACT_INFO_MAX_LEN + 1)),
        "users_contact_info_len",
      ),
    ];
    for (new_user, expected) in cases {
      match insert_user(&state, &new_user).unwrap_err() {
        StoreError::CheckViolation { constraint } => assert_eq!(constraint, expected),
        other => panic!("unexpected error: {:?}", other),
      }
    }
    assert_eq!(count_users(&state).unwrap(), 0);
  }

  #[test]
  fn test_missing_user_lookups() {
    let state = state();
    assert!(get_user(&state, 42).unwrap().is_none());
    assert!(get_user_by_username(&state, "nobody").unwrap().is_none());
  }

  #[test]
  fn test_record_login() {
    let state = state();
    let user_id = insert_user(&state, &NewUser::new("ada", "hash")).unwrap();
    record_login(&state, user_id).unwrap();
    let user = get_user(&state, user_id).unwrap().unwrap();
    assert!(user.last_login_time.is_some());

    let err = record_login(&state, user_id + 100).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "User", .. }));
  }

  #[test]
  fn test_login_time_with_fraction_or_t_separator_reads_back() {
    let state = state();
    let user_id = insert_user(&state, &NewUser::new("ada", "hash")).unwrap();

    for (raw, micros) in [("2024-03-01 12:30:05.123456", 123_456u32), ("2024-03-01T12:30:05", 0)] {
      execute_sql(
        &state,
        "UPDATE users SET last_login_time = ?1 WHERE user_id = ?2",
        Some(vec![serde_json::json!(raw), serde_json::json!(user_id)]),
      )
      .unwrap();

      let login = get_user(&state, user_id).unwrap().unwrap().last_login_time.unwrap();
      assert_eq!(login.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-03-01 12:30:05");
      assert_eq!(login.timestamp_subsec_micros(), micros);
    }
  }

  #[test]
  fn test_registration_time_is_immutable() {
    let state = state();
    let user_id = insert_user(&state, &NewUser::new("ada", "hash")).unwrap();
    let err = execute_sql(
      &state,
      "UPDATE users SET registration_time = '2000-01-01 00:00:00' WHERE user_id = ?1",
      Some(vec![serde_json::json!(user_id)]),
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::Immutable { .. }));
  }

  #[test]
  fn test_user_with_works_cannot_be_deleted() {
    let state = state();
    let user_id = insert_user(&state, &NewUser::new("ada", "hash")).unwrap();
    execute_sql(
      &state,
      "INSERT INTO user_works (author_id, title) VALUES (?1, 'notes')",
      Some(vec![serde_json::json!(user_id)]),
    )
    .unwrap();

    let err = execute_sql(
      &state,
      "DELETE FROM users WHERE user_id = ?1",
      Some(vec![serde_json::json!(user_id)]),
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::ForeignKeyViolation { .. }));
  }

  #[test]
  fn test_username_availability() {
    let state = state();
    let ada = insert_user(&state, &NewUser::new("ada", "hash")).unwrap();
    let grace = insert_user(&state, &NewUser::new("grace", "hash")).unwrap();

    assert!(is_username_available(&state, "linus", None).unwrap());
    assert!(!is_username_available(&state, "ada", None).unwrap());
    assert!(!is_username_available(&state, " ada ", Some(grace)).unwrap());
    assert!(is_username_available(&state, "ada", Some(ada)).unwrap());
    assert!(!is_username_available(&state, "   ", None).unwrap());
    assert!(!is_username_available(&state, &"n".repeat(21), None).unwrap());
  }

  #[test]
  fn test_update_profile_logs_changed_fields_only() {
    let state = state();
    let user_id = insert_user(&state, &NewUser::new("ada", "hash").with_bio("math")).unwrap();

    let changes = update_profile(
      &state,
      user_id,
      &ProfileUpdate {
        username: Some("ada".to_string()),
        bio: Some("engines".to_string()),
        contact_info: Some("ada@example.com".to_string()),
        avatar_url: None,
      },
      ChangeSource::User,
    )
    .unwrap();

    let fields: Vec<_> = changes.iter().map(|c| c.changed_field.as_str()).collect();
    assert_eq!(fields, vec!["bio", "contact_info"]);
    assert_eq!(changes[0].old_value.as_deref(), Some("math"));
    assert_eq!(changes[0].new_value.as_deref(), Some("engines"));
    assert_eq!(changes[1].old_value.as_deref(), Some(""));
    assert!(changes.iter().all(|c| c.change_source == "user"));

    let user = get_user(&state, user_id).unwrap().unwrap();
    assert_eq!(user.bio.as_deref(), Some("engines"));
    assert_eq!(user.contact_info.as_deref(), Some("ada@example.com"));
  }

  #[test]
  fn test_update_profile_rolls_back_on_taken_username() {
    let state = state();
    insert_user(&state, &NewUser::new("grace", "hash")).unwrap();
    let user_id = insert_user(&state, &NewUser::new("ada", "hash")).unwrap();

    let err = update_profile(
      &state,
      user_id,
      &ProfileUpdate {
        username: Some("grace".to_string()),
        bio: Some("changed".to_string()),
        ..Default::default()
      },
      ChangeSource::Admin,
    )
    .unwrap_err();
    assert!(matches!(err, StoreError::UniqueViolation { .. }));

    let user = get_user(&state, user_id).unwrap().unwrap();
    assert_eq!(user.username, "ada");
    assert_eq!(user.bio.as_deref(), Some(""));
    assert!(list_changes_for_user(&state, user_id, 0, 10).unwrap().is_empty());
  }

  #[test]
  fn test_update_profile_unknown_user() {
    let state = state();
    let err = update_profile(&state, 7, &ProfileUpdate::default(), ChangeSource::User).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "User", .. }));
  }
}
