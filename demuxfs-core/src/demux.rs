//! The TS packet engine.
//!
//! [`Demuxer::feed`] consumes a byte stream, resynchronises on the 0x47
//! sync byte, tracks per-PID continuity and routes each packet's payload to
//! the section assembler of its PID. Complete sections go through the
//! dispatcher to the registered table parser; media PIDs go to the PES
//! accounting path.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::descriptors::DescriptorRegistry;
use crate::dispatch::{
    DemuxContext, DemuxStats, DemuxStatsSnapshot, ParserData, PsiParserEntry, TableIdFilter,
};
use crate::fs::Dentry;
use crate::packet::{TsPacket, SYNC_BYTE, TS_PACKET_SIZE};
use crate::pes;
use crate::section::SectionAssembler;
use crate::tables::{self, pid, table_id};

/// Initial dispatcher population: the PIDs reserved by ABNT NBR 15603-1.
const RESERVED_PIDS: &[(u16, PsiParserEntry)] = &[
    (
        pid::PAT,
        PsiParserEntry {
            parse: tables::pat::parse,
            accepts: TableIdFilter::Exact(table_id::PAT),
            data: ParserData::None,
        },
    ),
    (
        pid::CAT,
        PsiParserEntry {
            parse: tables::others::parse,
            accepts: TableIdFilter::Exact(table_id::CAT),
            data: ParserData::None,
        },
    ),
    (
        pid::NIT,
        PsiParserEntry {
            parse: tables::nit::parse,
            accepts: TableIdFilter::Either(table_id::NIT, table_id::NIT_OTHER),
            data: ParserData::None,
        },
    ),
    (
        pid::SDT,
        PsiParserEntry {
            parse: tables::sdt::parse,
            accepts: TableIdFilter::Exact(table_id::SDT),
            data: ParserData::None,
        },
    ),
    (
        pid::H_EIT,
        PsiParserEntry {
            parse: tables::eit::parse,
            accepts: TableIdFilter::Range(table_id::EIT_FIRST, table_id::EIT_LAST),
            data: ParserData::None,
        },
    ),
    (
        pid::RST,
        PsiParserEntry {
            parse: tables::others::parse,
            accepts: TableIdFilter::Exact(table_id::RST),
            data: ParserData::None,
        },
    ),
    (
        pid::TDT,
        PsiParserEntry {
            parse: tables::tot::parse,
            accepts: TableIdFilter::Either(table_id::TDT, table_id::TOT),
            data: ParserData::None,
        },
    ),
    (
        pid::DCT,
        PsiParserEntry {
            parse: tables::others::parse,
            accepts: TableIdFilter::Exact(table_id::DCT),
            data: ParserData::None,
        },
    ),
    (
        pid::DIT,
        PsiParserEntry {
            parse: tables::others::parse,
            accepts: TableIdFilter::Exact(table_id::DIT),
            data: ParserData::None,
        },
    ),
    (
        pid::SIT,
        PsiParserEntry {
            parse: tables::others::parse,
            accepts: TableIdFilter::Exact(table_id::SIT),
            data: ParserData::None,
        },
    ),
    (
        pid::PCAT,
        PsiParserEntry {
            parse: tables::others::parse,
            accepts: TableIdFilter::Exact(table_id::PCAT),
            data: ParserData::None,
        },
    ),
    (
        pid::SDTT1,
        PsiParserEntry {
            parse: tables::others::parse,
            accepts: TableIdFilter::Exact(table_id::SDTT),
            data: ParserData::None,
        },
    ),
    (
        pid::BIT,
        PsiParserEntry {
            parse: tables::others::parse,
            accepts: TableIdFilter::Exact(table_id::BIT),
            data: ParserData::None,
        },
    ),
    (
        pid::NBIT_LDT,
        PsiParserEntry {
            parse: tables::others::parse,
            accepts: TableIdFilter::Range(table_id::NBIT_BODY, table_id::LDT),
            data: ParserData::None,
        },
    ),
    (
        pid::M_EIT,
        PsiParserEntry {
            parse: tables::eit::parse,
            accepts: TableIdFilter::Range(table_id::EIT_FIRST, table_id::EIT_LAST),
            data: ParserData::None,
        },
    ),
    (
        pid::L_EIT,
        PsiParserEntry {
            parse: tables::eit::parse,
            accepts: TableIdFilter::Range(table_id::EIT_FIRST, table_id::EIT_LAST),
            data: ParserData::None,
        },
    ),
    (
        pid::SDTT2,
        PsiParserEntry {
            parse: tables::others::parse,
            accepts: TableIdFilter::Exact(table_id::SDTT),
            data: ParserData::None,
        },
    ),
    (
        pid::CDT,
        PsiParserEntry {
            parse: tables::others::parse,
            accepts: TableIdFilter::Exact(table_id::CDT),
            data: ParserData::None,
        },
    ),
];

/// The transport stream demultiplexer.
///
/// One instance is driven by a single ingestion thread; the tree and the
/// dispatch tables it maintains may be read concurrently through
/// [`Demuxer::context`].
pub struct Demuxer {
    ctx: Arc<DemuxContext>,
    /// Per-PID section assemblers.
    assemblers: HashMap<u16, SectionAssembler>,
    /// Per-PID last continuity counter.
    continuity: HashMap<u16, u8>,
    /// Carry-over bytes of a packet split across `feed` calls.
    pending: Vec<u8>,
}

impl Default for Demuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demuxer {
    /// Create a demultiplexer with the built-in descriptor registry and the
    /// reserved PID map installed.
    pub fn new() -> Self {
        Self::with_registry(DescriptorRegistry::builtin())
    }

    /// Create a demultiplexer with a caller-supplied descriptor registry.
    pub fn with_registry(registry: DescriptorRegistry) -> Self {
        let ctx = DemuxContext::new(registry);
        for (pid, entry) in RESERVED_PIDS {
            ctx.register_psi_parser(*pid, *entry);
        }
        Demuxer {
            ctx,
            assemblers: HashMap::new(),
            continuity: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// Shared state: dispatch tables, tree root and counters.
    pub fn context(&self) -> Arc<DemuxContext> {
        Arc::clone(&self.ctx)
    }

    /// Root of the output tree.
    pub fn root(&self) -> Arc<Dentry> {
        Arc::clone(&self.ctx.root)
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> DemuxStatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Consume a chunk of the input byte stream.
    ///
    /// The chunk need not be packet aligned: bytes before the first sync
    /// byte are skipped and a trailing partial packet is kept for the next
    /// call.
    pub fn feed(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);

        let mut offset = 0;
        let mut packet = [0u8; TS_PACKET_SIZE];
        while self.pending.len() - offset >= TS_PACKET_SIZE {
            if self.pending[offset] != SYNC_BYTE {
                offset += 1;
                DemuxStats::bump(&self.ctx.stats.sync_losses);
                continue;
            }
            packet.copy_from_slice(&self.pending[offset..offset + TS_PACKET_SIZE]);
            offset += TS_PACKET_SIZE;
            self.process_packet(&packet);
        }
        self.pending.drain(..offset);
    }

    fn process_packet(&mut self, data: &[u8; TS_PACKET_SIZE]) {
        let packet = match TsPacket::parse(data) {
            Ok(packet) => packet,
            Err(_) => return,
        };
        let header = packet.header;
        DemuxStats::bump(&self.ctx.stats.packets);

        if header.transport_error {
            DemuxStats::bump(&self.ctx.stats.transport_errors);
            return;
        }
        if header.pid == pid::NULL {
            return;
        }

        let Some(entry) = self.ctx.psi_parser(header.pid) else {
            pes::feed(&self.ctx, header.pid, packet.payload.len());
            return;
        };

        if header.is_scrambled() {
            debug!("pid {:#06x}: dropping scrambled PSI packet", header.pid);
            return;
        }

        // Continuity: the counter advances by one (mod 16) on every packet
        // of the PID that carries payload. A gap without the discontinuity
        // indicator invalidates any section in progress on this PID only.
        if header.has_payload() {
            if let Some(&previous) = self.continuity.get(&header.pid) {
                let expected = (previous + 1) & 0x0F;
                if header.continuity_counter != expected && !packet.discontinuity() {
                    warn!(
                        "pid {:#06x}: continuity jump {} -> {}, dropping section in progress",
                        header.pid, previous, header.continuity_counter
                    );
                    DemuxStats::bump(&self.ctx.stats.discontinuities);
                    if let Some(assembler) = self.assemblers.get_mut(&header.pid) {
                        assembler.reset();
                    }
                }
            }
            self.continuity.insert(header.pid, header.continuity_counter);
        }

        if !header.has_payload() || packet.payload.is_empty() {
            return;
        }

        let assembler = self.assemblers.entry(header.pid).or_default();
        let sections = assembler.push(packet.payload, header.payload_unit_start, header.pid);

        for section in sections {
            let table_id = section[0];
            if !entry.accepts.matches(table_id) {
                debug!(
                    "pid {:#06x}: table id {table_id:#04x} not accepted by registration",
                    header.pid
                );
                continue;
            }
            if let Err(e) = (entry.parse)(&header, &section, entry.data, &self.ctx) {
                warn!("pid {:#06x}: dropping section: {e}", header.pid);
                DemuxStats::bump(&self.ctx.stats.section_errors);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fsutils::lookup;
    use crate::testutil::{build_packet, build_section, pat_payload};

    #[test]
    fn test_reserved_pids_installed() {
        let demuxer = Demuxer::new();
        assert!(demuxer.ctx.has_psi_parser(pid::PAT));
        assert!(demuxer.ctx.has_psi_parser(pid::NIT));
        assert!(demuxer.ctx.has_psi_parser(pid::CDT));
        assert!(!demuxer.ctx.has_psi_parser(0x0100));
    }

    #[test]
    fn test_feed_pat_builds_tree() {
        let mut demuxer = Demuxer::new();
        let section = build_section(0x00, 0x7FE1, 0, 0, 0, &pat_payload(&[(1, 0x0100)]));
        demuxer.feed(&build_packet(pid::PAT, 0, &section));

        assert!(lookup(&demuxer.root(), "/PAT/V00/Programs/0x0001").is_some());
        assert_eq!(demuxer.stats().packets, 1);
        assert_eq!(demuxer.stats().tables_installed, 1);
    }

    #[test]
    fn test_feed_resynchronises() {
        let mut demuxer = Demuxer::new();
        let section = build_section(0x00, 0x7FE1, 0, 0, 0, &pat_payload(&[(1, 0x0100)]));
        let mut stream = vec![0xAB, 0xCD, 0xEF];
        stream.extend_from_slice(&build_packet(pid::PAT, 0, &section));
        demuxer.feed(&stream);

        assert_eq!(demuxer.stats().sync_losses, 3);
        assert!(lookup(&demuxer.root(), "/PAT/V00").is_some());
    }

    #[test]
    fn test_feed_across_chunk_boundary() {
        let mut demuxer = Demuxer::new();
        let section = build_section(0x00, 0x7FE1, 0, 0, 0, &pat_payload(&[(1, 0x0100)]));
        let packet = build_packet(pid::PAT, 0, &section);

        demuxer.feed(&packet[..100]);
        assert_eq!(demuxer.stats().packets, 0);
        demuxer.feed(&packet[100..]);
        assert_eq!(demuxer.stats().packets, 1);
        assert!(lookup(&demuxer.root(), "/PAT/V00").is_some());
    }

    #[test]
    fn test_transport_error_packet_dropped() {
        let mut demuxer = Demuxer::new();
        let section = build_section(0x00, 0x7FE1, 0, 0, 0, &pat_payload(&[(1, 0x0100)]));
        let mut packet = build_packet(pid::PAT, 0, &section);
        packet[1] |= 0x80; // transport_error_indicator

        demuxer.feed(&packet);
        assert_eq!(demuxer.stats().transport_errors, 1);
        assert!(lookup(&demuxer.root(), "/PAT").is_none());
    }

    #[test]
    fn test_unknown_pid_dropped() {
        let mut demuxer = Demuxer::new();
        let section = build_section(0x42, 0x7FE1, 0, 0, 0, &[0x7F, 0xE0, 0xFF]);
        demuxer.feed(&build_packet(0x0999, 0, &section));
        assert_eq!(demuxer.root().child_count(), 0);
    }

    #[test]
    fn test_filter_rejects_foreign_table_id() {
        let mut demuxer = Demuxer::new();
        // A PMT section arriving on the PAT PID is not accepted.
        let section = build_section(0x02, 0x0001, 0, 0, 0, &[0xE1, 0x00, 0xF0, 0x00]);
        demuxer.feed(&build_packet(pid::PAT, 0, &section));
        assert!(lookup(&demuxer.root(), "/PAT").is_none());
        assert_eq!(demuxer.stats().section_errors, 0);
    }
}
