//! Leaf creation helpers.
//!
//! Numeric fields become files whose content is the decimal ASCII value,
//! with the hex rendering (`0x%0Nx`, width from the wire size of the field)
//! in the `user.hex` extended attribute. Binary fields expose raw bytes and
//! MJD/BCD timestamps expose ISO-8601 strings.

use std::sync::Arc;

use crate::byteops;
use crate::error::FsError;
use crate::fs::dentry::{Dentry, XATTR_HEX};

/// Create a numeric leaf. `byte_width` is the field's size on the wire and
/// controls the zero-padding of the hex xattr.
pub fn create_number_leaf(
    parent: &Arc<Dentry>,
    name: &str,
    value: u64,
    byte_width: usize,
) -> Result<Arc<Dentry>, FsError> {
    let leaf = Dentry::new_file(name, value.to_string().into_bytes());
    leaf.set_xattr(
        XATTR_HEX,
        format!("0x{value:0width$x}", width = byte_width * 2).into_bytes(),
    );
    parent.add_child(leaf)
}

/// Create a one-bit flag leaf (0 or 1).
pub fn create_flag_leaf(parent: &Arc<Dentry>, name: &str, value: bool) -> Result<Arc<Dentry>, FsError> {
    create_number_leaf(parent, name, value as u64, 1)
}

/// Create a raw binary leaf.
pub fn create_bin_leaf(parent: &Arc<Dentry>, name: &str, data: &[u8]) -> Result<Arc<Dentry>, FsError> {
    parent.add_child(Dentry::new_file(name, data.to_vec()))
}

/// Create a text leaf.
pub fn create_string_leaf(parent: &Arc<Dentry>, name: &str, value: &str) -> Result<Arc<Dentry>, FsError> {
    parent.add_child(Dentry::new_file(name, value.as_bytes().to_vec()))
}

/// Create a timestamp leaf from a 5-byte MJD + packed-BCD field.
///
/// Renders ISO-8601; a field that does not decode as a date falls back to
/// the raw bytes.
pub fn create_datetime_leaf(
    parent: &Arc<Dentry>,
    name: &str,
    mjd_bcd: &[u8],
) -> Result<Arc<Dentry>, FsError> {
    match byteops::mjd_bcd_datetime(mjd_bcd) {
        Some(datetime) => create_string_leaf(
            parent,
            name,
            &datetime.format("%Y-%m-%dT%H:%M:%S").to_string(),
        ),
        None => create_bin_leaf(parent, name, mjd_bcd),
    }
}

/// Create a symlink child.
pub fn create_symlink(parent: &Arc<Dentry>, name: &str, target: &str) -> Result<Arc<Dentry>, FsError> {
    parent.add_child(Dentry::new_symlink(name, target))
}
