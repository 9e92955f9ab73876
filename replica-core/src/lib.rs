//! Replica Core - Entity Types
//!
//! Pure data structures shared by the replica cache crates: tenant identity,
//! the data-definition model, the query descriptor, configuration and the
//! error taxonomy. This crate contains no I/O.

mod config;
mod error;
mod identity;
mod model;
mod query;

pub use config::*;
pub use error::*;
pub use identity::*;
pub use model::*;
pub use query::*;
