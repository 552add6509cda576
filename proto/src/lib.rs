//! Wire types shared by the Kiln client crates and the stand-in backend.
//!
//! Nothing in here performs I/O. The types mirror the JSON the hosted backend
//! speaks on its REST, auth and realtime endpoints.

pub mod auth;
pub mod collection;
pub mod error;
pub mod id;
pub mod realtime;

pub use auth::*;
pub use collection::*;
pub use error::*;
pub use id::*;
pub use realtime::*;
