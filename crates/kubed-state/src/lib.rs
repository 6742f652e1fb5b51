//! kubed-state — the distributed process table.
//!
//! The table is the session's registry of processes launched into the
//! cluster. It is a cache: the cluster holds the truth, and the table is
//! rebuilt from it at session start and whenever the context changes.
//!
//! `ProcessTable` is `Send` + `Sync`; one lock guards the whole table so a
//! rebuild is never observed half-done.

pub mod error;
pub mod table;

pub use error::{TableError, TableResult};
pub use table::ProcessTable;
