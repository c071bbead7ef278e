//! upnotifier library
//!
//! Connection manager and update state store of the "new version deployed"
//! notification flow.

pub mod app;
pub mod authn;
pub mod channel;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod storage;
pub mod update;
pub mod utils;
pub mod workers;
