//! NB Music Types - Pure type definitions shared by the core and the server
//!
//! This crate contains only plain data types (configuration model, session
//! record, response envelope) with no runtime dependencies.

pub mod config;
pub mod response;
pub mod session;

pub use config::*;
pub use response::*;
pub use session::*;
