use crate::db::core::{timestamp_at, DbState};
use crate::error::{StoreError, StoreResult};
use crate::models::{NewWork, UserWork, WorkWithAuthor};
use rusqlite::{params, OptionalExtension, Row};

const WORK_WITH_AUTHOR_SELECT: &str = r#"SELECT w.id, w.author_id, w.title, w.body, w.created, u.username
  FROM user_works w JOIN users u ON w.author_id = u.user_id"#;

fn map_work_with_author(row: &Row) -> rusqlite::Result<WorkWithAuthor> {
  Ok(WorkWithAuthor {
    work: UserWork {
      id: row.get(0)?,
      author_id: row.get(1)?,
      title: row.get(2)?,
      body: row.get(3)?,
      created: timestamp_at(row, 4)?,
    },
    username: row.get(5)?,
  })
}

/// Inserts a new work and returns its id.
pub fn insert_work(state: &DbState, new_work: &NewWork) -> StoreResult<i64> {
  state.with_conn(|conn| {
    conn.execute(
      "INSERT INTO user_works (author_id, title, body) VALUES (?1, ?2, ?3)",
      params![new_work.author_id, new_work.title, new_work.body],
    )?;
    let id = conn.last_insert_rowid();
    log::info!("[db] Created work {} for author {}", id, new_work.author_id);
    Ok(id)
  })
}

/// Gets a work and its author's username.
pub fn get_work(state: &DbState, id: i64) -> StoreResult<Option<WorkWithAuthor>> {
  state.with_conn(|conn| {
    let sql = format!("{} WHERE w.id = ?1", WORK_WITH_AUTHOR_SELECT);
    Ok(conn.query_row(&sql, params![id], map_work_with_author).optional()?)
  })
}

/// Gets all works, most recent first, with pagination.
pub fn list_works(state: &DbState, offset: u32, limit: u32) -> StoreResult<Vec<WorkWithAuthor>> {
  state.with_conn(|conn| {
    let sql = format!(
      "{} ORDER BY w.created DESC, w.id DESC LIMIT ?1 OFFSET ?2",
      WORK_WITH_AUTHOR_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
      .query_map(params![limit, offset], map_work_with_author)?
      .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
  })
}

/// Gets the most recent works of the user currently named `username`.
pub fn list_works_by_author(
  state: &DbState,
  username: &str,
  limit: u32,
) -> StoreResult<Vec<WorkWithAuthor>> {
  state.with_conn(|conn| {
    let sql = format!(
      "{} WHERE u.username = ?1 ORDER BY w.created DESC, w.id DESC LIMIT ?2",
      WORK_WITH_AUTHOR_SELECT
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
      .query_map(params![username, limit], map_work_with_author)?
      .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
  })
}

pub fn count_works_by_author(state: &DbState, author_id: i64) -> StoreResult<i64> {
  state.with_conn(|conn| {
    Ok(conn.query_row(
      "SELECT COUNT(*) FROM user_works WHERE author_id = ?1",
      params![author_id],
      |row| row.get(0),
    )?)
  })
}

/// Replaces a work's title and body. `created` and `author_id` are left alone.
pub fn update_work(state: &DbState, id: i64, title: &str, body: Option<&str>) -> StoreResult<()> {
  state.with_conn(|conn| {
    let updated = conn.execute(
      "UPDATE user_works SET title = ?1, body = ?2 WHERE id = ?3",
      params![title, body, id],
    )?;
    if updated == 0 {
      return Err(StoreError::not_found("Work", id));
    }
    log::info!("[db] Updated work {}", id);
    Ok(())
  })
}

pub fn delete_work(state: &DbState, id: i64) -> StoreResult<()> {
  state.with_conn(|conn| {
    let deleted = conn.execute("DELETE FROM user_works WHERE id = ?1", params![id])?;
    if deleted == 0 {
      return Err(StoreError::not_found("Work", id));
    }
    log::info!("[db] Deleted work {}", id);
    Ok(())
  })
}
