//! An in-memory backend speaking the same REST, auth, realtime and storage dialects
//! as the hosted service. Used by the integration tests and for local development.

pub mod auth;
pub mod backend;
pub mod objects;
pub mod rest;
pub mod server;
pub mod state;
pub mod ws_server;

pub use backend::{Backend, Failure, TableSpec};
pub use server::{Server, ServerBuilder, ServerHandle};
pub use state::ServerState;
