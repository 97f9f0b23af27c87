//! PID-indexed dispatch tables and shared demultiplexer state.
//!
//! `psi_parsers` routes complete sections to table parsers; `psi_tables`
//! tracks the installed version of every table; `pes_parsers`/`pes_tables`
//! do the analogous accounting for elementary stream PIDs. All maps are
//! written only by the ingestion thread and may be read concurrently, so
//! they sit behind reader-writer locks and entries are replaced whole.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::descriptors::DescriptorRegistry;
use crate::error::DemuxError;
use crate::fs::Dentry;
use crate::packet::TsHeader;

/// Composite key for `psi_tables`: `(pid << 8) | table_id`.
///
/// Coarse on purpose: subtables sharing a PID and table id (EIT services)
/// share a slot and the latest arrival wins.
pub fn table_key(pid: u16, table_id: u8) -> u32 {
    ((pid as u32) << 8) | table_id as u32
}

/// Table-id predicate attached to a dispatcher registration.
///
/// Several table kinds can share one PID (SDT and BAT on 0x11, the EIT
/// family on 0x12), so every registration declares which table ids it
/// accepts and the dispatcher checks the section's first byte against it
/// before invoking the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableIdFilter {
    /// Accept exactly one table id.
    Exact(u8),
    /// Accept either of two table ids.
    Either(u8, u8),
    /// Accept an inclusive range of table ids.
    Range(u8, u8),
    /// Accept any table id.
    Any,
}

impl TableIdFilter {
    /// Check a section's table id against this filter.
    pub fn matches(&self, table_id: u8) -> bool {
        match *self {
            TableIdFilter::Exact(id) => table_id == id,
            TableIdFilter::Either(a, b) => table_id == a || table_id == b,
            TableIdFilter::Range(lo, hi) => (lo..=hi).contains(&table_id),
            TableIdFilter::Any => true,
        }
    }
}

/// Caller-opaque data handed back to a parse function on every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserData {
    /// Nothing attached.
    None,
    /// Directory name for parsers shared between tables.
    TableName(&'static str),
}

/// Signature of a section parse function.
pub type SectionParseFn =
    fn(&TsHeader, &[u8], ParserData, &DemuxContext) -> Result<(), DemuxError>;

/// One `psi_parsers` registration.
#[derive(Clone, Copy)]
pub struct PsiParserEntry {
    /// Parse function invoked with each complete, accepted section.
    pub parse: SectionParseFn,
    /// Table ids this registration accepts.
    pub accepts: TableIdFilter,
    /// Opaque registration data.
    pub data: ParserData,
}

/// One `pes_parsers` registration, made by the PMT parser for each
/// elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesParserEntry {
    /// Stream type from the PMT ES loop.
    pub stream_type: u8,
}

/// Per-PID elementary stream accounting, the `pes_tables` analogue of a
/// table object. ES payloads themselves are not decoded here.
#[derive(Debug, Default)]
pub struct PesStream {
    /// Stream type from the PMT.
    pub stream_type: u8,
    /// Packets seen for this PID.
    pub packets: AtomicU64,
    /// Payload bytes seen for this PID.
    pub bytes: AtomicU64,
}

/// Installed version of one table: the slot value of `psi_tables`.
#[derive(Debug)]
pub struct TableSlot {
    /// Version of the installed table.
    pub version_number: u8,
    /// Section numbers already merged into this version.
    pub sections_seen: HashSet<u8>,
    /// The `Vnn` directory holding the parsed output.
    pub version_dir: Arc<Dentry>,
}

/// Pipeline counters, written by the ingestion thread and readable from
/// anywhere.
#[derive(Debug, Default)]
pub struct DemuxStats {
    /// TS packets processed.
    pub packets: AtomicU64,
    /// Bytes skipped while hunting for a sync byte.
    pub sync_losses: AtomicU64,
    /// Packets dropped for transport_error_indicator.
    pub transport_errors: AtomicU64,
    /// Sections dropped for continuity errors.
    pub discontinuities: AtomicU64,
    /// Sections rejected by parsers (CRC or structure).
    pub section_errors: AtomicU64,
    /// Sections accepted by parsers.
    pub sections: AtomicU64,
    /// New table versions installed.
    pub tables_installed: AtomicU64,
}

/// Point-in-time copy of [`DemuxStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStatsSnapshot {
    pub packets: u64,
    pub sync_losses: u64,
    pub transport_errors: u64,
    pub discontinuities: u64,
    pub section_errors: u64,
    pub sections: u64,
    pub tables_installed: u64,
}

impl DemuxStats {
    /// Snapshot every counter.
    pub fn snapshot(&self) -> DemuxStatsSnapshot {
        DemuxStatsSnapshot {
            packets: self.packets.load(Ordering::Relaxed),
            sync_losses: self.sync_losses.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            discontinuities: self.discontinuities.load(Ordering::Relaxed),
            section_errors: self.section_errors.load(Ordering::Relaxed),
            sections: self.sections.load(Ordering::Relaxed),
            tables_installed: self.tables_installed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared between the ingestion thread and concurrent tree readers.
pub struct DemuxContext {
    /// Root of the output tree.
    pub root: Arc<Dentry>,
    /// PID → section parser registrations.
    pub psi_parsers: RwLock<HashMap<u16, PsiParserEntry>>,
    /// `(pid << 8) | table_id` → installed table version.
    pub psi_tables: RwLock<HashMap<u32, TableSlot>>,
    /// ES PID → stream registration.
    pub pes_parsers: RwLock<HashMap<u16, PesParserEntry>>,
    /// ES PID → stream accounting object.
    pub pes_tables: RwLock<HashMap<u16, Arc<PesStream>>>,
    /// Descriptor tag → decoder registry.
    pub descriptors: DescriptorRegistry,
    /// Pipeline counters.
    pub stats: DemuxStats,
}

impl DemuxContext {
    /// Create an empty context with the given descriptor registry.
    pub fn new(descriptors: DescriptorRegistry) -> Arc<Self> {
        Arc::new(DemuxContext {
            root: Dentry::new_root(),
            psi_parsers: RwLock::new(HashMap::new()),
            psi_tables: RwLock::new(HashMap::new()),
            pes_parsers: RwLock::new(HashMap::new()),
            pes_tables: RwLock::new(HashMap::new()),
            descriptors,
            stats: DemuxStats::default(),
        })
    }

    /// Register a section parser for a PID. Re-registration replaces the
    /// entry and is idempotent.
    pub fn register_psi_parser(&self, pid: u16, entry: PsiParserEntry) {
        self.psi_parsers.write().insert(pid, entry);
    }

    /// Register a section parser only if the PID is unknown.
    pub fn register_psi_parser_if_absent(&self, pid: u16, entry: PsiParserEntry) {
        self.psi_parsers.write().entry(pid).or_insert(entry);
    }

    /// Look up the parser registration for a PID.
    pub fn psi_parser(&self, pid: u16) -> Option<PsiParserEntry> {
        self.psi_parsers.read().get(&pid).copied()
    }

    /// Check whether a PID has a registered section parser.
    pub fn has_psi_parser(&self, pid: u16) -> bool {
        self.psi_parsers.read().contains_key(&pid)
    }

    /// Register an elementary stream PID.
    pub fn register_pes_parser(&self, pid: u16, entry: PesParserEntry) {
        self.pes_parsers.write().insert(pid, entry);
    }

    /// Look up an elementary stream registration.
    pub fn pes_parser(&self, pid: u16) -> Option<PesParserEntry> {
        self.pes_parsers.read().get(&pid).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_key() {
        assert_eq!(table_key(0x0000, 0x00), 0x0000_0000);
        assert_eq!(table_key(0x0100, 0x02), 0x0001_0002);
        assert_eq!(table_key(0x1FFF, 0xC8), 0x001F_FFC8);
    }

    #[test]
    fn test_table_id_filter() {
        assert!(TableIdFilter::Exact(0x02).matches(0x02));
        assert!(!TableIdFilter::Exact(0x02).matches(0x00));
        assert!(TableIdFilter::Either(0x40, 0x41).matches(0x41));
        assert!(TableIdFilter::Range(0x4E, 0x5F).matches(0x50));
        assert!(!TableIdFilter::Range(0x4E, 0x5F).matches(0x60));
        assert!(TableIdFilter::Any.matches(0xFE));
    }

    #[test]
    fn test_register_if_absent_keeps_existing() {
        fn parse_a(
            _: &TsHeader,
            _: &[u8],
            _: ParserData,
            _: &DemuxContext,
        ) -> Result<(), DemuxError> {
            Ok(())
        }

        let ctx = DemuxContext::new(DescriptorRegistry::builtin());
        let entry = PsiParserEntry {
            parse: parse_a,
            accepts: TableIdFilter::Exact(0x02),
            data: ParserData::None,
        };
        ctx.register_psi_parser_if_absent(0x100, entry);
        ctx.register_psi_parser_if_absent(
            0x100,
            PsiParserEntry {
                accepts: TableIdFilter::Any,
                ..entry
            },
        );
        assert_eq!(
            ctx.psi_parser(0x100).unwrap().accepts,
            TableIdFilter::Exact(0x02)
        );
    }
}
