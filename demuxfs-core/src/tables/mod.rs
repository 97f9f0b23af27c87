//! PSI/SI table parsers and the shared version-install machinery.
//!
//! Every parser follows the same shape: validate the section, look up the
//! table slot, build a fresh `Vnn` subtree detached from the tree, then
//! publish it with a single splice (attach, retarget `Current`, migrate the
//! superseded version's orphans, detach the old subtree). Readers never see
//! a half-built version.

pub mod dsmcc;
pub mod eit;
pub mod nit;
pub mod others;
pub mod pat;
pub mod pmt;
pub mod sdt;
pub mod tot;

use std::collections::HashSet;
use std::sync::Arc;

use log::debug;

use crate::dispatch::{table_key, DemuxContext, DemuxStats, TableSlot};
use crate::error::FsError;
use crate::fs::fsutils::{self, version_dir_name};
use crate::fs::render::{create_flag_leaf, create_number_leaf};
use crate::fs::Dentry;
use crate::psi::PsiHeader;

/// Well-known PIDs (ABNT NBR 15603-1).
pub mod pid {
    /// Program Association Table.
    pub const PAT: u16 = 0x0000;
    /// Conditional Access Table.
    pub const CAT: u16 = 0x0001;
    /// Network Information Table.
    pub const NIT: u16 = 0x0010;
    /// Service Description Table / Bouquet Association Table.
    pub const SDT: u16 = 0x0011;
    /// EIT for fixed reception (H-EIT).
    pub const H_EIT: u16 = 0x0012;
    /// Running Status Table.
    pub const RST: u16 = 0x0013;
    /// Time and Date Table / Time Offset Table.
    pub const TDT: u16 = 0x0014;
    /// Download Control Table.
    pub const DCT: u16 = 0x0017;
    /// Discontinuity Information Table.
    pub const DIT: u16 = 0x001E;
    /// Selection Information Table.
    pub const SIT: u16 = 0x001F;
    /// Partial Content Announcement Table.
    pub const PCAT: u16 = 0x0022;
    /// Software Download Trigger Table (first PID).
    pub const SDTT1: u16 = 0x0023;
    /// Broadcaster Information Table.
    pub const BIT: u16 = 0x0024;
    /// Network Board Information Table / Linked Description Table.
    pub const NBIT_LDT: u16 = 0x0025;
    /// EIT for mobile reception (M-EIT).
    pub const M_EIT: u16 = 0x0026;
    /// EIT for 1seg reception (L-EIT).
    pub const L_EIT: u16 = 0x0027;
    /// Software Download Trigger Table (second PID).
    pub const SDTT2: u16 = 0x0028;
    /// Common Data Table.
    pub const CDT: u16 = 0x0029;
    /// Null packets.
    pub const NULL: u16 = 0x1FFF;
}

/// Well-known table ids (ABNT NBR 15603-1).
pub mod table_id {
    /// Program Association Section.
    pub const PAT: u8 = 0x00;
    /// Conditional Access Section.
    pub const CAT: u8 = 0x01;
    /// Program Map Section.
    pub const PMT: u8 = 0x02;
    /// DSM-CC Download Info Indication.
    pub const DII: u8 = 0x3B;
    /// DSM-CC Download Data Block.
    pub const DDB: u8 = 0x3C;
    /// Network Information Section, actual network.
    pub const NIT: u8 = 0x40;
    /// Network Information Section, other network.
    pub const NIT_OTHER: u8 = 0x41;
    /// Service Description Section, actual TS.
    pub const SDT: u8 = 0x42;
    /// First EIT table id (present/following, actual TS).
    pub const EIT_FIRST: u8 = 0x4E;
    /// Last EIT table id (schedule extended).
    pub const EIT_LAST: u8 = 0x5F;
    /// Running Status Section.
    pub const RST: u8 = 0x71;
    /// Stuffing Section.
    pub const ST: u8 = 0x72;
    /// Time and Date Section.
    pub const TDT: u8 = 0x70;
    /// Time Offset Section.
    pub const TOT: u8 = 0x73;
    /// Application Information Section.
    pub const AIT: u8 = 0x74;
    /// Discontinuity Information Section.
    pub const DIT: u8 = 0x7E;
    /// Selection Information Section.
    pub const SIT: u8 = 0x7F;
    /// Download Control Section.
    pub const DCT: u8 = 0xC0;
    /// Partial Content Announcement Section.
    pub const PCAT: u8 = 0xC2;
    /// Software Download Trigger Section.
    pub const SDTT: u8 = 0xC3;
    /// Broadcaster Information Section.
    pub const BIT: u8 = 0xC4;
    /// Network Board Information Section (body).
    pub const NBIT_BODY: u8 = 0xC5;
    /// Network Board Information Section (reference).
    pub const NBIT_REF: u8 = 0xC6;
    /// Linked Description Section.
    pub const LDT: u8 = 0xC7;
    /// Common Data Section.
    pub const CDT: u8 = 0xC8;
    /// Last table id reserved to PSI/SI proper.
    pub const LAST_PSI: u8 = 0xBF;
}

/// Fixed names used in the output tree.
pub mod fsnames {
    pub const PAT: &str = "PAT";
    pub const PMT: &str = "PMT";
    pub const NIT: &str = "NIT";
    pub const SDT: &str = "SDT";
    pub const EIT: &str = "EIT";
    pub const TDT: &str = "TDT";
    pub const TOT: &str = "TOT";
    pub const DSMCC: &str = "DSM-CC";
    pub const PROGRAMS: &str = "Programs";
    pub const STREAMS: &str = "Streams";
    pub const CURRENT: &str = "Current";
}

/// Outcome of probing the table slot for an arriving section.
pub enum TableUpdate {
    /// First section of a new version: a detached `Vnn` directory to
    /// populate and then [`publish`].
    New(PendingVersion),
    /// Another section of the installed version: append into the live
    /// version directory.
    Append(Arc<Dentry>),
    /// This exact version and section is already installed.
    Duplicate,
}

/// A freshly created, not yet visible version directory.
pub struct PendingVersion {
    key: u32,
    version: u8,
    section_number: u8,
    /// The detached `Vnn` directory.
    pub dir: Arc<Dentry>,
}

/// Probe `psi_tables` for the slot of `(pid, table_id)` and decide what to
/// do with a section of the given header.
///
/// Idempotent delivery: a version and section number pair that is already
/// installed comes back as [`TableUpdate::Duplicate`].
pub fn prepare_update(ctx: &DemuxContext, ts_pid: u16, header: &PsiHeader) -> TableUpdate {
    let key = table_key(ts_pid, header.table_id);
    let mut tables = ctx.psi_tables.write();
    if let Some(slot) = tables.get_mut(&key) {
        if slot.version_number == header.version_number {
            if slot.sections_seen.contains(&header.section_number) {
                return TableUpdate::Duplicate;
            }
            slot.sections_seen.insert(header.section_number);
            return TableUpdate::Append(Arc::clone(&slot.version_dir));
        }
    }
    TableUpdate::New(PendingVersion {
        key,
        version: header.version_number,
        section_number: header.section_number,
        dir: Dentry::new_directory(version_dir_name(header.version_number)),
    })
}

/// Splice a populated version directory into the tree.
///
/// Attaches the new `Vnn` under `table_dir`, retargets `Current`, migrates
/// children of the superseded version that the new one did not re-create,
/// detaches the old version directory and replaces the table slot. Readers
/// holding the old subtree keep it alive until they drop their references.
pub fn publish(
    ctx: &DemuxContext,
    table_dir: &Arc<Dentry>,
    pending: PendingVersion,
) -> Result<Arc<Dentry>, FsError> {
    let PendingVersion {
        key,
        version,
        section_number,
        dir,
    } = pending;

    let old = {
        let tables = ctx.psi_tables.read();
        tables.get(&key).map(|slot| Arc::clone(&slot.version_dir))
    };

    if let Some(old_dir) = &old {
        fsutils::migrate_children(old_dir, &dir);
    }

    // A stale directory with the same name (version number reuse after
    // wrap-around) is detached first so the insert cannot collide.
    if table_dir.has_child(dir.name()) {
        table_dir.remove_child(dir.name());
    }
    let dir = table_dir.add_child(dir)?;
    fsutils::update_current_link(table_dir, version)?;

    if let Some(old_dir) = &old {
        if old_dir.name() != dir.name() {
            table_dir.remove_child(old_dir.name());
        }
        debug!("superseded {} by {}", old_dir.path(), dir.path());
    }

    let mut sections_seen = HashSet::new();
    sections_seen.insert(section_number);
    ctx.psi_tables.write().insert(
        key,
        TableSlot {
            version_number: version,
            sections_seen,
            version_dir: Arc::clone(&dir),
        },
    );
    DemuxStats::bump(&ctx.stats.tables_installed);
    Ok(dir)
}

/// Create the standard leaves for a long-section header. `id_field` names
/// the table-specific meaning of the table id extension.
pub fn create_psi_header_leaves(
    dir: &Arc<Dentry>,
    header: &PsiHeader,
    id_field: &'static str,
) -> Result<(), FsError> {
    create_number_leaf(dir, "table_id", header.table_id as u64, 1)?;
    create_flag_leaf(dir, "section_syntax_indicator", header.section_syntax_indicator)?;
    create_number_leaf(dir, "section_length", header.section_length as u64, 2)?;
    if header.section_syntax_indicator {
        create_number_leaf(dir, id_field, header.table_id_extension as u64, 2)?;
        create_number_leaf(dir, "version_number", header.version_number as u64, 1)?;
        create_flag_leaf(dir, "current_next_indicator", header.current_next_indicator)?;
        create_number_leaf(dir, "section_number", header.section_number as u64, 1)?;
        create_number_leaf(dir, "last_section_number", header.last_section_number as u64, 1)?;
        create_number_leaf(dir, "crc32", header.crc32 as u64, 4)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::DescriptorRegistry;
    use crate::fs::fsutils::lookup;

    fn header(version: u8, section_number: u8) -> PsiHeader {
        PsiHeader {
            table_id: 0x42,
            section_syntax_indicator: true,
            private_indicator: false,
            section_length: 13,
            table_id_extension: 0x7FE1,
            version_number: version,
            current_next_indicator: true,
            section_number,
            last_section_number: 0,
            crc32: 0,
        }
    }

    #[test]
    fn test_new_then_duplicate_then_append() {
        let ctx = DemuxContext::new(DescriptorRegistry::empty());
        let table_dir = ctx.root.add_child(Dentry::new_directory("SDT")).unwrap();

        let pending = match prepare_update(&ctx, 0x11, &header(0, 0)) {
            TableUpdate::New(p) => p,
            _ => panic!("expected New"),
        };
        publish(&ctx, &table_dir, pending).unwrap();

        assert!(matches!(
            prepare_update(&ctx, 0x11, &header(0, 0)),
            TableUpdate::Duplicate
        ));
        assert!(matches!(
            prepare_update(&ctx, 0x11, &header(0, 1)),
            TableUpdate::Append(_)
        ));
    }

    #[test]
    fn test_publish_supersedes_and_migrates() {
        let ctx = DemuxContext::new(DescriptorRegistry::empty());
        let table_dir = ctx.root.add_child(Dentry::new_directory("SDT")).unwrap();

        let v0 = match prepare_update(&ctx, 0x11, &header(0, 0)) {
            TableUpdate::New(p) => p,
            _ => panic!(),
        };
        v0.dir.add_child(Dentry::new_file("only_in_v0", vec![0x31])).unwrap();
        let v0_dir = publish(&ctx, &table_dir, v0).unwrap();

        let v1 = match prepare_update(&ctx, 0x11, &header(1, 0)) {
            TableUpdate::New(p) => p,
            _ => panic!(),
        };
        publish(&ctx, &table_dir, v1).unwrap();

        // Current points at V01, V00 is gone from the tree, the orphan
        // migrated.
        assert_eq!(
            table_dir.get_child("Current").unwrap().symlink_target().unwrap(),
            "V01"
        );
        assert!(lookup(&ctx.root, "/SDT/V00").is_none());
        assert!(lookup(&ctx.root, "/SDT/V01/only_in_v0").is_some());
        // The detached V00 stays readable through the held reference.
        assert_eq!(v0_dir.name(), "V00");
        assert_eq!(Arc::strong_count(&v0_dir), 1);
    }
}
