//! Operation table, registry, and the static module bundle.

pub mod core;
pub mod fs;
pub mod pure;
pub mod registry;
pub mod table;
pub mod web;

pub use registry::{Handler, Module, Registry};
pub use table::{OpDef, Param, Table};
