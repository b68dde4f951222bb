//! Session persistence
//!
//! Layout of a saved session directory and the columnar store holding each
//! source's timestamps and payloads.

pub mod bundle;
pub mod schema;
pub mod writer;

pub use bundle::{
    encode_name, is_valid_session, read_metadata, write_metadata, BundleError, SessionLayout,
};
pub use schema::{GroupMeta, SessionMetadata, SourceEntry, VideoParams, SESSION_VERSION};
pub use writer::{read_group, read_group_meta, write_group, PayloadColumn, PersistenceError, StoredGroup};
