//! Docflow store adapters.
//!
//! Case records, their attribute bags, and correspondence registers are owned
//! by the host system. This crate defines the narrow interface the lifecycle
//! engine consumes, plus an in-memory and a JSON snapshot backend.

pub mod dates;
pub mod error;
pub mod file;
pub mod memory;
pub mod store;
pub mod types;

pub use dates::parse_date;
pub use error::{Result, StoreError};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use store::{CaseStore, RegisterStore, Store};
pub use types::{
    Attachment, AttrLookup, Attributes, CaseFilter, CaseRecord, DateBound, DetachOutcome, ExportStamp,
    Register, RegisterKey, RegisterType, STATE_ATTR,
};
