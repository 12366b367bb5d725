//! Database server module
//!
//! TCP accept loop plus bounded request execution.

pub mod connection_manager;
pub mod database_server;

pub use connection_manager::ConnectionManager;
pub use database_server::DatabaseServer;
