pub mod bucket;
pub mod changes;
pub mod client;
pub mod config;
pub mod connector;
pub mod error;
pub mod query;
pub mod record;
pub mod session;
pub mod table;
mod transport;

pub use bucket::Bucket;
pub use changes::{ChangeEvent, ChangeKind, ChangeStream, ChannelHandle};
pub use client::Client;
pub use config::ClientConfig;
pub use query::QueryOptions;
pub use record::Record;
pub use session::{AuthState, Session, SessionContext};
pub use table::{BulkFailure, BulkUpdate, Table};

pub use kiln_proto as proto;
pub use kiln_proto::{CollectionId, RecordId};
