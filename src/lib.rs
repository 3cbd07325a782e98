//! SQLite persistence for a small blogging site: registered users, the works
//! they author, and an append-only log of their profile edits.
pub mod constants;
pub mod db;
pub mod error;
pub mod models;
pub mod settings;

pub use db::DbState;
pub use error::{StoreError, StoreResult};
pub use settings::Settings;
