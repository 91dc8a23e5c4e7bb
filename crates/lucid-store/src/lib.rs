//! Persistence for lucid knowledge bases: an append-only SQLite log of
//! compiled entries, replayed into a fresh knowledge base on open.

pub mod error;
pub mod kbs;
pub mod schema;
pub mod store;

pub use error::{Result, StoreError};
pub use kbs::{DATA_DIR_ENV, KbStore, default_base_dir, sanitize_name};
pub use store::Store;
