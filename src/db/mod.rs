pub mod core;
pub mod profile_log;
pub mod users;
pub mod works;

pub use self::core::{
  execute_sql, initialize_database, open_connection, open_in_memory, reset_database, schema_sql,
  schema_version, DbState,
};
