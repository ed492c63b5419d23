//! A client-side, versioned dataset distribution layer for large audio
//! corpora: publish new database versions, load an arbitrary version
//! (optionally re-encoded to a flavor), stream a table row-by-row, and
//! share a local cache across processes.

pub mod api;
pub mod audio;
pub mod backend;
pub mod cache;
pub mod config;
pub mod define;
pub mod dependencies;
pub mod error;
pub mod flavor;
pub mod header;
pub mod info;
pub mod load;
pub mod lock;
pub mod publish;
pub mod repository;
pub mod stream;
pub mod table;
pub mod utils;

pub use error::{Error, Result};
pub use flavor::Flavor;
pub use header::Header;
