//! libSQL storage for the sync queue

mod connection;
mod migrations;
mod repository;

pub use connection::Database;
pub use repository::LibSqlActionStore;
