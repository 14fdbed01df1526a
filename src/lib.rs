pub mod agent;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod llm;
pub mod row;
pub mod sql_guard;

pub use agent::Agent;
pub use config::Settings;
pub use error::{BotError, Result};
pub use format::reply::AgentResult;
pub use row::{Row, Value};
pub use sql_guard::{guard_sql, SqlGuard};
