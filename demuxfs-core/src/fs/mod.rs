//! The in-memory virtual filesystem the parsed tables are projected into.

mod dentry;
pub mod fsutils;
pub mod render;

pub use dentry::{Dentry, DentryKind, XATTR_HEX};
