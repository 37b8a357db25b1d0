//! Shared value types and error taxonomy used across every `ladc` crate.
//!
//! This crate sits at the bottom of the dependency graph: `address`,
//! `property` and `error` have no dependency on configuration, scheduling
//! or wire-format code, so they can be shared by the detection pipeline,
//! the crypto envelope and the CLI without pulling any of those in.

pub mod address;
pub mod error;
pub mod grammar;
pub mod mru;
pub mod property;
pub mod wire;

pub use address::{AddressFamily, HostAddress};
pub use error::LadcError;
pub use mru::{MruAddressList, MruList};
pub use property::Property;
