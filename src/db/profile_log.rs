//! Append-only audit trail of profile edits.
//!
//! Rows are never updated or deleted; the schema's triggers reject both.

use crate::db::core::{timestamp_at, DbState};
use crate::error::{StoreError, StoreResult};
use crate::models::{NewProfileChange, ProfileChange};
use rusqlite::{params, Connection, Row};

const CHANGE_COLUMNS: &str =
  "log_id, user_id, changed_field, old_value, new_value, change_time, change_source";

fn map_change(row: &Row) -> rusqlite::Result<ProfileChange> {
  Ok(ProfileChange {
    log_id: row.get(0)?,
    user_id: row.get(1)?,
    changed_field: row.get(2)?,
    old_value: row.get(3)?,
    new_value: row.get(4)?,
    change_time: timestamp_at(row, 5)?,
    change_source: row.get(6)?,
  })
}

/// Inserts a change row on an existing connection or open transaction.
pub(crate) fn append_change_tx(conn: &Connection, change: &NewProfileChange) -> StoreResult<i64> {
  match change.change_source {
    Some(source) => conn.execute(
      "INSERT INTO profile_change_log (user_id, changed_field, old_value, new_value, change_source)
         VALUES (?1, ?2, ?3, ?4, ?5)",
      params![
        change.user_id,
        change.changed_field,
        change.old_value,
        change.new_value,
        source.as_str(),
      ],
    )?,
    None => conn.execute(
      "INSERT INTO profile_change_log (user_id, changed_field, old_value, new_value)
         VALUES (?1, ?2, ?3, ?4)",
      params![
        change.user_id,
        change.changed_field,
        change.old_value,
        change.new_value,
      ],
    )?,
  };
  Ok(conn.last_insert_rowid())
}

pub(crate) fn fetch_change(conn: &Connection, log_id: i64) -> StoreResult<ProfileChange> {
  let sql = format!("SELECT {} FROM profile_change_log WHERE log_id = ?1", CHANGE_COLUMNS);
  conn
    .query_row(&sql, params![log_id], map_change)
    .map_err(|e| match e {
      rusqlite::Error::QueryReturnedNoRows => StoreError::not_found("Profile change", log_id),
      other => other.into(),
    })
}

/// Appends one audit record and returns its `log_id`.
pub fn append_change(state: &DbState, change: &NewProfileChange) -> StoreResult<i64> {
  state.with_conn(|conn| {
    let log_id = append_change_tx(conn, change)?;
    log::debug!(
      "[db] Logged change of {} for user {} as {}",
      change.changed_field,
      change.user_id,
      log_id
    );
    Ok(log_id)
  })
}

pub fn get_change(state: &DbState, log_id: i64) -> StoreResult<ProfileChange> {
  state.with_conn(|conn| fetch_change(conn, log_id))
}

/// Gets a user's change history, newest first, with pagination.
pub fn list_changes_for_user(
  state: &DbState,
  user_id: i64,
  offset: u32,
  limit: u32,
) -> StoreResult<Vec<ProfileChange>> {
  state.with_conn(|conn| {
    let sql = format!(
      "SELECT {} FROM profile_change_log WHERE user_id = ?1
         ORDER BY change_time DESC, log_id DESC LIMIT ?2 OFFSET ?3",
      CHANGE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
      .query_map(params![user_id, limit, offset], map_change)?
      .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
  })
}
