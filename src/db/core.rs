use crate::constants::{
  AVATAR_URL_MAX_LEN, CHANGED_FIELD_MAX_LEN, CHANGE_SOURCE_MAX_LEN, CONTACT_INFO_MAX_LEN,
  DEFAULT_AVATAR_URL, DEFAULT_CHANGE_SOURCE, NAIVE_DATETIME_FORMATS, PASSWORD_MAX_LEN,
  PROFILE_CHANGE_LOG_TABLE, TITLE_MAX_LEN, USERNAME_MAX_LEN, USERS_TABLE, USER_WORKS_TABLE,
};
use crate::error::{StoreError, StoreResult};
use crate::settings::Settings;
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use rusqlite::types::{Type, Value as RusqliteValue, ValueRef};
use rusqlite::{params_from_iter, Connection, Row};
use rusqlite_migration::{Migrations, M};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

pub struct DbState(pub Mutex<Option<Connection>>);

/// Tables, defaults and constraints. Length limits are named CHECK
/// constraints since SQLite ignores VARCHAR sizes; a NULL length passes.
fn create_tables_sql() -> String {
  format!(
    r#"
        CREATE TABLE IF NOT EXISTS {users} (
          user_id INTEGER PRIMARY KEY AUTOINCREMENT,
          username VARCHAR({username_len}) NOT NULL UNIQUE,
          password VARCHAR({password_len}) NOT NULL,
          avatar_url VARCHAR({avatar_len}) DEFAULT '{default_avatar}',
          bio TEXT DEFAULT '',
          contact_info VARCHAR({contact_len}) DEFAULT '',
          registration_time TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
          last_login_time TIMESTAMP,
          CONSTRAINT users_username_len CHECK (length(username) <= {username_len}),
          CONSTRAINT users_password_len CHECK (length(password) <= {password_len}),
          CONSTRAINT users_avatar_url_len CHECK (length(avatar_url) <= {avatar_len}),
          CONSTRAINT users_contact_info_len CHECK (length(contact_info) <= {contact_len})
        );

        CREATE TABLE IF NOT EXISTS {works} (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          author_id INTEGER NOT NULL,
          title VARCHAR({title_len}) NOT NULL,
          body TEXT,
          created TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
          CONSTRAINT user_works_title_len CHECK (length(title) <= {title_len}),
          FOREIGN KEY (author_id) REFERENCES {users} (user_id)
        );

        CREATE TABLE IF NOT EXISTS {log} (
          log_id INTEGER PRIMARY KEY AUTOINCREMENT,
          user_id INTEGER NOT NULL,
          changed_field VARCHAR({field_len}) NOT NULL,
          old_value TEXT,
          new_value TEXT,
          change_time TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
          change_source VARCHAR({source_len}) NOT NULL DEFAULT '{default_source}',
          CONSTRAINT profile_change_log_changed_field_len CHECK (length(changed_field) <= {field_len}),
          CONSTRAINT profile_change_log_change_source_len CHECK (length(change_source) <= {source_len}),
          FOREIGN KEY (user_id) REFERENCES {users} (user_id)
        );
      "#,
    users = USERS_TABLE,
    works = USER_WORKS_TABLE,
    log = PROFILE_CHANGE_LOG_TABLE,
    username_len = USERNAME_MAX_LEN,
    password_len = PASSWORD_MAX_LEN,
    avatar_len = AVATAR_URL_MAX_LEN,
    contact_len = CONTACT_INFO_MAX_LEN,
    title_len = TITLE_MAX_LEN,
    field_len = CHANGED_FIELD_MAX_LEN,
    source_len = CHANGE_SOURCE_MAX_LEN,
    default_avatar = DEFAULT_AVATAR_URL,
    default_source = DEFAULT_CHANGE_SOURCE,
  )
}

/// Write-once columns and the append-only audit table.
fn immutability_triggers_sql() -> String {
  format!(
    r#"
        CREATE TRIGGER IF NOT EXISTS users_registration_time_immutable
        BEFORE UPDATE OF registration_time ON {users}
        WHEN NEW.registration_time IS NOT OLD.registration_time
        BEGIN
          SELECT RAISE(ABORT, '{users}.registration_time is immutable');
        END;

        CREATE TRIGGER IF NOT EXISTS profile_change_log_no_update
        BEFORE UPDATE ON {log}
        BEGIN
          SELECT RAISE(ABORT, '{log} rows are append-only');
        END;

        CREATE TRIGGER IF NOT EXISTS profile_change_log_no_delete
        BEFORE DELETE ON {log}
        BEGIN
          SELECT RAISE(ABORT, '{log} rows are append-only');
        END;
      "#,
    users = USERS_TABLE,
    log = PROFILE_CHANGE_LOG_TABLE,
  )
}

pub static CREATE_TABLES: Lazy<String> = Lazy::new(create_tables_sql);
pub static IMMUTABILITY_TRIGGERS: Lazy<String> = Lazy::new(immutability_triggers_sql);

// Database schema migrations
static MIGRATIONS: Lazy<Migrations<'static>> = Lazy::new(|| {
  Migrations::new(vec![
    M::up(CREATE_TABLES.as_str()),
    M::up(IMMUTABILITY_TRIGGERS.as_str()),
  ])
});

/// Full DDL in migration order, for dumping.
pub fn schema_sql() -> String {
  format!("{}\n{}", CREATE_TABLES.trim_end(), IMMUTABILITY_TRIGGERS.trim_end())
}

impl DbState {
  pub fn new(conn: Connection) -> Self {
    DbState(Mutex::new(Some(conn)))
  }

  /// A state with no connection; operations fail with `ConnectionUnavailable`.
  pub fn empty() -> Self {
    DbState(Mutex::new(None))
  }

  pub fn open_in_memory() -> StoreResult<Self> {
    Ok(Self::new(open_in_memory()?))
  }

  /// Runs `f` against the held connection while the lock is taken.
  pub fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
  where
    F: FnOnce(&Connection) -> StoreResult<T>,
  {
    let conn_guard = self.0.lock()?;
    let conn = conn_guard
      .as_ref()
      .ok_or(StoreError::ConnectionUnavailable)?;
    f(conn)
  }
}

fn prepare_connection(mut conn: Connection) -> StoreResult<Connection> {
  // Off by default in SQLite, and must be set outside a transaction
  conn.pragma_update(None, "foreign_keys", true)?;

  log::info!("[db] Applying database migrations...");
  MIGRATIONS.to_latest(&mut conn)?;
  log::info!("[db] Migrations applied successfully.");

  Ok(conn)
}

/// Opens (creating if needed) the database file and brings the schema up to date.
pub fn open_connection(db_path: &Path) -> StoreResult<Connection> {
  log::debug!("[db] Opening database at {:?}", db_path);
  let conn = Connection::open(db_path)?;
  prepare_connection(conn)
}

pub fn open_in_memory() -> StoreResult<Connection> {
  prepare_connection(Connection::open_in_memory()?)
}

/// Initializes the SQLite database at the configured path and runs migrations.
pub fn initialize_database(settings: &Settings) -> StoreResult<Connection> {
  if let Some(parent) = settings.db_path.parent() {
    if !parent.as_os_str().is_empty() {
      fs::create_dir_all(parent)?;
    }
  }
  open_connection(&settings.db_path)
}

/// Current migration version, as recorded in `PRAGMA user_version`.
pub fn schema_version(state: &DbState) -> StoreResult<i64> {
  state.with_conn(|conn| {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
  })
}

// ============================================================================
// Timestamps
// ============================================================================

/// Reads `CURRENT_TIMESTAMP` text, with or without fractional seconds or a
/// `T` separator. Zone-less values are UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
  for format in NAIVE_DATETIME_FORMATS {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
      return Ok(dt.and_utc());
    }
  }
  DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
  let raw: String = row.get(idx)?;
  parse_timestamp(&raw)
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn optional_timestamp_at(
  row: &Row,
  idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
  let raw: Option<String> = row.get(idx)?;
  raw
    .map(|raw| {
      parse_timestamp(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

// ============================================================================
// SQL console
// ============================================================================

// Helper to convert rusqlite ValueRef to serde_json Value
fn rusqlite_to_json(value_ref: ValueRef) -> JsonValue {
  match value_ref {
    ValueRef::Null => JsonValue::Null,
    ValueRef::Integer(i) => JsonValue::Number(i.into()),
    ValueRef::Real(f) => serde_json::Number::from_f64(f)
      .map(JsonValue::Number)
      .unwrap_or(JsonValue::Null),
    ValueRef::Text(t_bytes) => JsonValue::String(String::from_utf8_lossy(t_bytes).to_string()),
    ValueRef::Blob(b) => JsonValue::String(format!("Blob({} bytes)", b.len())),
  }
}

// Helper to convert serde_json Value to rusqlite Value
fn json_to_rusqlite(json_value: &JsonValue) -> StoreResult<RusqliteValue> {
  match json_value {
    JsonValue::Null => Ok(RusqliteValue::Null),
    JsonValue::Bool(b) => Ok(RusqliteValue::Integer(*b as i64)),
    JsonValue::Number(n) => {
      if let Some(i) = n.as_i64() {
        Ok(RusqliteValue::Integer(i))
      } else if let Some(f) = n.as_f64() {
        Ok(RusqliteValue::Real(f))
      } else {
        Err(StoreError::invalid_input("Unsupported number type"))
      }
    }
    JsonValue::String(s) => Ok(RusqliteValue::Text(s.clone())),
    _ => Err(StoreError::invalid_input(format!(
      "Unsupported JSON type for parameter: {:?}",
      json_value
    ))),
  }
}

/// Executes an arbitrary SQL statement. For maintenance and debugging.
///
/// Queries return an array of row objects keyed by column name; anything
/// else returns `{"rows_affected": n}`.
pub fn execute_sql(
  state: &DbState,
  sql: &str,
  params: Option<Vec<JsonValue>>,
) -> StoreResult<JsonValue> {
  log::debug!("[db] Executing SQL: {}", sql);
  if let Some(p) = &params {
    log::debug!("[db] With params: {:?}", p);
  }

  let rusqlite_params: Vec<RusqliteValue> = match params {
    Some(json_params) => json_params
      .iter()
      .map(json_to_rusqlite)
      .collect::<StoreResult<Vec<_>>>()?,
    None => Vec::new(),
  };

  state.with_conn(|conn| {
    let mut stmt = conn.prepare(sql)?;

    if stmt.column_count() > 0 {
      let column_names: Vec<String> = stmt
        .column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

      let rows = stmt
        .query_map(params_from_iter(rusqlite_params.iter()), |row| {
          let mut map = serde_json::Map::new();
          for (i, col_name) in column_names.iter().enumerate() {
            map.insert(col_name.clone(), rusqlite_to_json(row.get_ref(i)?));
          }
          Ok(JsonValue::Object(map))
        })?
        .collect::<Result<Vec<_>, _>>()?;

      Ok(JsonValue::Array(rows))
    } else {
      let rows_affected = stmt.execute(params_from_iter(rusqlite_params.iter()))?;
      Ok(serde_json::json!({ "rows_affected": rows_affected }))
    }
  })
}

/// Closes the current connection, deletes the database file, and initializes a fresh database.
pub fn reset_database(state: &DbState, settings: &Settings) -> StoreResult<()> {
  log::info!("[db] Attempting to reset database...");
  log::debug!("[db] Target database path for reset: {:?}", settings.db_path);

  let mut conn_guard = state.0.lock()?;
  if let Some(conn) = conn_guard.take() {
    if let Err((_, e)) = conn.close() {
      log::warn!("[db] Error closing database connection: {}", e);
    }
    log::info!("[db] Closed existing database connection.");
  }

  log::info!("[db] Deleting database file: {:?}", settings.db_path);
  match fs::remove_file(&settings.db_path) {
    Ok(_) => log::info!("[db] Database file deleted successfully."),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      log::debug!("[db] Database file not found, skipping deletion.")
    }
    Err(e) => return Err(e.into()),
  }

  log::info!("[db] Re-initializing database...");
  match initialize_database(settings) {
    Ok(new_conn) => {
      *conn_guard = Some(new_conn);
      log::info!("[db] Database reset and re-initialized successfully.");
      Ok(())
    }
    Err(e) => {
      log::error!("[db] Failed to re-initialize database: {}", e);
      Err(e)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn table_names(state: &DbState) -> Vec<String> {
    let rows = execute_sql(
      state,
      "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
      None,
    )
    .unwrap();
    rows
      .as_array()
      .unwrap()
      .iter()
      .map(|r| r["name"].as_str().unwrap().to_string())
      .collect()
  }

  #[test]
  fn test_migrations_validate() {
    assert!(MIGRATIONS.validate().is_ok());
  }

  #[test]
  fn test_schema_creates_three_tables() {
    let state = DbState::open_in_memory().unwrap();
    assert_eq!(
      table_names(&state),
      vec![PROFILE_CHANGE_LOG_TABLE, USER_WORKS_TABLE, USERS_TABLE]
    );
    assert_eq!(schema_version(&state).unwrap(), 2);
  }

  #[test]
  fn test_schema_sql_carries_limits_and_defaults() {
    let ddl = schema_sql();
    assert!(ddl.contains(&format!("length(username) <= {}", USERNAME_MAX_LEN)));
    assert!(ddl.contains(&format!("length(title) <= {}", TITLE_MAX_LEN)));
    assert!(ddl.contains(&format!("DEFAULT '{}'", DEFAULT_AVATAR_URL)));
    assert!(ddl.contains(&format!("DEFAULT '{}'", DEFAULT_CHANGE_SOURCE)));
    assert!(ddl.contains("CREATE TRIGGER IF NOT EXISTS profile_change_log_no_delete"));
  }

  #[test]
  fn test_foreign_keys_enabled() {
    let state = DbState::open_in_memory().unwrap();
    let rows = execute_sql(&state, "PRAGMA foreign_keys", None).unwrap();
    assert_eq!(rows, json!([{ "foreign_keys": 1 }]));
  }

  #[test]
  fn test_no_cascade_declared() {
    let state = DbState::open_in_memory().unwrap();
    for table in [USER_WORKS_TABLE, PROFILE_CHANGE_LOG_TABLE] {
      let rows = execute_sql(
        &state,
        &format!("SELECT \"table\", on_delete FROM pragma_foreign_key_list('{}')", table),
        None,
      )
      .unwrap();
      assert_eq!(rows, json!([{ "table": USERS_TABLE, "on_delete": "NO ACTION" }]));
    }
  }

  #[test]
  fn test_execute_sql_select_and_write() {
    let state = DbState::open_in_memory().unwrap();
    let inserted = execute_sql(
      &state,
      "INSERT INTO users (username, password) VALUES (?1, ?2)",
      Some(vec![json!("ada"), json!("hash")]),
    )
    .unwrap();
    assert_eq!(inserted, json!({ "rows_affected": 1 }));

    let rows = execute_sql(
      &state,
      "SELECT username, avatar_url, bio, contact_info, last_login_time FROM users WHERE username = ?1",
      Some(vec![json!("ada")]),
    )
    .unwrap();
    assert_eq!(
      rows,
      json!([{
        "username": "ada",
        "avatar_url": "default_avatar.png",
        "bio": "",
        "contact_info": "",
        "last_login_time": null
      }])
    );
  }

  #[test]
  fn test_execute_sql_rejects_nested_params() {
    let state = DbState::open_in_memory().unwrap();
    let err = execute_sql(&state, "SELECT ?1", Some(vec![json!({ "a": 1 })])).unwrap_err();
    assert!(matches!(err, StoreError::InvalidInput { .. }));
  }

  #[test]
  fn test_empty_state_reports_unavailable() {
    let state = DbState::empty();
    let err = schema_version(&state).unwrap_err();
    assert!(matches!(err, StoreError::ConnectionUnavailable));
  }

  #[test]
  fn test_parse_timestamp_formats() {
    let a = parse_timestamp("2024-03-01 12:30:05").unwrap();
    let b = parse_timestamp("2024-03-01T12:30:05+00:00").unwrap();
    assert_eq!(a, b);
    assert_eq!(parse_timestamp("2024-03-01T12:30:05").unwrap(), a);
    assert_eq!(parse_timestamp("2024-03-01T12:30:05Z").unwrap(), a);

    let fractional = parse_timestamp("2024-03-01 12:30:05.123456").unwrap();
    assert_eq!(fractional.timestamp(), a.timestamp());
    assert_eq!(fractional.timestamp_subsec_micros(), 123_456);
    assert_eq!(parse_timestamp("2024-03-01T12:30:05.123456").unwrap(), fractional);

    assert!(parse_timestamp("yesterday").is_err());
    assert!(parse_timestamp("2024-03-01").is_err());
  }

  #[test]
  fn test_initialize_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::default().with_db_path(dir.path().join("nested/site.sqlite"));

    let conn = initialize_database(&settings).unwrap();
    conn
      .execute(
        "INSERT INTO users (username, password) VALUES ('ada', 'hash')",
        [],
      )
      .unwrap();
    drop(conn);

    let state = DbState::new(initialize_database(&settings).unwrap());
    assert_eq!(schema_version(&state).unwrap(), 2);
    let rows = execute_sql(&state, "SELECT COUNT(*) AS n FROM users", None).unwrap();
    assert_eq!(rows, json!([{ "n": 1 }]));
  }

  #[test]
  fn test_reset_database_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::default().with_db_path(dir.path().join("site.sqlite"));
    let state = DbState::new(initialize_database(&settings).unwrap());
    execute_sql(
      &state,
      "INSERT INTO users (username, password) VALUES ('ada', 'hash')",
      None,
    )
    .unwrap();

    reset_database(&state, &settings).unwrap();

    let rows = execute_sql(&state, "SELECT COUNT(*) AS n FROM users", None).unwrap();
    assert_eq!(rows, json!([{ "n": 0 }]));
    assert_eq!(schema_version(&state).unwrap(), 2);
  }
}
