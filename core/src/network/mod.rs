//! Network communication module
//!
//! Request/response framing shared by the server and the driver.

pub mod connection;
pub mod protocol;

pub use connection::NetworkConnection;
pub use protocol::{ErrorBody, Request, RequestType, Response, ResponseCode};
