//! Tree manipulation helpers: version directories, the `Current` symlink,
//! child migration across versions and path resolution.

use std::sync::Arc;

use log::debug;

use crate::error::FsError;
use crate::fs::dentry::{Dentry, DentryKind};

/// Name of the per-table symlink pointing at the active version directory.
pub const CURRENT_NAME: &str = "Current";

/// Maximum number of symlinks followed during resolution.
const MAX_LINK_DEPTH: usize = 16;

/// Directory name for a table version, `V%02d`.
pub fn version_dir_name(version: u8) -> String {
    format!("V{version:02}")
}

/// Get or create a directory child.
pub fn create_directory(parent: &Arc<Dentry>, name: &str) -> Result<Arc<Dentry>, FsError> {
    if let Some(existing) = parent.get_child(name) {
        return Ok(existing);
    }
    parent.add_child(Dentry::new_directory(name))
}

/// Point `parent/Current` at the given version directory, creating the
/// symlink on first use. Retargeting is atomic from a reader's viewpoint.
pub fn update_current_link(parent: &Arc<Dentry>, version: u8) -> Result<(), FsError> {
    let target = version_dir_name(version);
    match parent.get_child(CURRENT_NAME) {
        Some(link) if link.kind() == DentryKind::Symlink => {
            link.set_symlink_target(&target);
            Ok(())
        }
        Some(_) => Err(FsError::DuplicateName(CURRENT_NAME.to_string())),
        None => {
            parent.add_child(Dentry::new_symlink(CURRENT_NAME, &target))?;
            Ok(())
        }
    }
}

/// Reparent the children of a superseded version directory that the new
/// version did not re-create, so externally held paths into them survive.
/// Children whose names exist in `new_root` stay behind for disposal.
pub fn migrate_children(old_root: &Arc<Dentry>, new_root: &Arc<Dentry>) {
    for child in old_root.children() {
        if new_root.has_child(child.name()) {
            continue;
        }
        if let Some(child) = old_root.remove_child(child.name()) {
            debug!("migrating {:?} into {}", child.name(), new_root.path());
            // The name was just checked absent, so this cannot collide.
            let _ = new_root.add_child(child);
        }
    }
}

/// Look up a path without following symlinks.
pub fn lookup(root: &Arc<Dentry>, path: &str) -> Option<Arc<Dentry>> {
    let mut current = Arc::clone(root);
    for component in path.split('/').filter(|c| !c.is_empty()) {
        current = match component {
            "." => current,
            ".." => current.parent().unwrap_or(current),
            name => current.get_child(name)?,
        };
    }
    Some(current)
}

/// Resolve a path, following symlinks in any component.
///
/// Symlink targets are interpreted relative to the link's directory. Depth
/// is bounded so that a malformed target chain cannot loop forever.
pub fn resolve(root: &Arc<Dentry>, path: &str) -> Option<Arc<Dentry>> {
    resolve_from(root, root, path, 0)
}

fn resolve_from(
    root: &Arc<Dentry>,
    base: &Arc<Dentry>,
    path: &str,
    depth: usize,
) -> Option<Arc<Dentry>> {
    if depth > MAX_LINK_DEPTH {
        return None;
    }
    let mut current = if path.starts_with('/') {
        Arc::clone(root)
    } else {
        Arc::clone(base)
    };
    for component in path.split('/').filter(|c| !c.is_empty()) {
        current = match component {
            "." => current,
            ".." => current.parent().unwrap_or(current),
            name => {
                let child = current.get_child(name)?;
                if child.kind() == DentryKind::Symlink {
                    let target = child.symlink_target()?;
                    resolve_from(root, &current, &target, depth + 1)?
                } else {
                    child
                }
            }
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_dir_name() {
        assert_eq!(version_dir_name(0), "V00");
        assert_eq!(version_dir_name(31), "V31");
    }

    #[test]
    fn test_update_current_link() {
        let table = Dentry::new_directory("PAT");
        update_current_link(&table, 0).unwrap();
        assert_eq!(
            table.get_child(CURRENT_NAME).unwrap().symlink_target().unwrap(),
            "V00"
        );
        update_current_link(&table, 1).unwrap();
        assert_eq!(
            table.get_child(CURRENT_NAME).unwrap().symlink_target().unwrap(),
            "V01"
        );
        // Retargeting reuses the same dentry.
        assert_eq!(table.child_count(), 1);
    }

    #[test]
    fn test_migrate_children() {
        let old = Dentry::new_directory("V00");
        let new = Dentry::new_directory("V01");
        old.add_child(Dentry::new_file("shared", vec![0x31])).unwrap();
        old.add_child(Dentry::new_file("orphan", vec![0x32])).unwrap();
        new.add_child(Dentry::new_file("shared", vec![0x33])).unwrap();

        migrate_children(&old, &new);

        // "orphan" moved, "shared" kept the new version's copy.
        assert!(old.has_child("shared"));
        assert!(!old.has_child("orphan"));
        let orphan = new.get_child("orphan").unwrap();
        assert_eq!(orphan.content(), vec![0x32]);
        assert_eq!(orphan.parent().unwrap().name(), "V01");
        assert_eq!(new.get_child("shared").unwrap().content(), vec![0x33]);
    }

    #[test]
    fn test_lookup() {
        let root = Dentry::new_root();
        let pat = root.add_child(Dentry::new_directory("PAT")).unwrap();
        let v00 = pat.add_child(Dentry::new_directory("V00")).unwrap();
        v00.add_child(Dentry::new_file("table_id", vec![0x30])).unwrap();

        assert!(lookup(&root, "/PAT/V00/table_id").is_some());
        assert!(lookup(&root, "PAT/V00").is_some());
        assert!(lookup(&root, "/PAT/V01").is_none());
        assert_eq!(lookup(&root, "/").unwrap().inode(), root.inode());
    }

    #[test]
    fn test_resolve_follows_relative_symlinks() {
        let root = Dentry::new_root();
        let pat = root.add_child(Dentry::new_directory("PAT")).unwrap();
        let v00 = pat.add_child(Dentry::new_directory("V00")).unwrap();
        let programs = v00.add_child(Dentry::new_directory("Programs")).unwrap();
        update_current_link(&pat, 0).unwrap();

        let pmt = root.add_child(Dentry::new_directory("PMT")).unwrap();
        let pmt_pid = pmt.add_child(Dentry::new_directory("0x0100")).unwrap();
        let pmt_v = pmt_pid.add_child(Dentry::new_directory("V00")).unwrap();
        update_current_link(&pmt_pid, 0).unwrap();

        programs
            .add_child(Dentry::new_symlink("0x0001", "../../../PMT/0x0100/Current"))
            .unwrap();

        let resolved = resolve(&root, "/PAT/Current/Programs/0x0001").unwrap();
        assert_eq!(resolved.inode(), pmt_v.inode());
    }

    #[test]
    fn test_resolve_depth_limited() {
        let root = Dentry::new_root();
        root.add_child(Dentry::new_symlink("a", "b")).unwrap();
        root.add_child(Dentry::new_symlink("b", "a")).unwrap();
        assert!(resolve(&root, "/a").is_none());
    }
}
