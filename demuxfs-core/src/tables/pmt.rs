//! PMT (Program Map Table) parsing.
//!
//! The PMT describes one program: its PCR PID, program-level descriptors
//! and the elementary stream loop. Accepting a PMT registers every ES PID —
//! media PIDs for PES accounting, DSM-CC PIDs for section parsing.

use std::sync::Arc;

use log::{debug, info};

use crate::descriptors::create_descriptor_dirs;
use crate::dispatch::{
    DemuxContext, DemuxStats, ParserData, PesParserEntry, PsiParserEntry, TableIdFilter,
};
use crate::error::DemuxError;
use crate::fs::fsutils::create_directory;
use crate::fs::render::create_number_leaf;
use crate::fs::Dentry;
use crate::packet::TsHeader;
use crate::psi::PsiSection;
use crate::tables::{
    self, create_psi_header_leaves, fsnames, prepare_update, publish, table_id, TableUpdate,
};

/// Stream type constants from the PMT ES loop.
pub mod stream_type {
    /// MPEG-2 Video.
    pub const MPEG2_VIDEO: u8 = 0x02;
    /// MPEG-2 Private Sections.
    pub const PRIVATE_SECTIONS: u8 = 0x05;
    /// ISO/IEC 13818-6 type A (DSM-CC multiprotocol encapsulation).
    pub const DSMCC_TYPE_A: u8 = 0x0A;
    /// ISO/IEC 13818-6 type B (DSM-CC U-N messages, object carousel).
    pub const DSMCC_TYPE_B: u8 = 0x0B;
    /// ISO/IEC 13818-6 type C (DSM-CC stream descriptors).
    pub const DSMCC_TYPE_C: u8 = 0x0C;
    /// ISO/IEC 13818-6 type D (DSM-CC sections).
    pub const DSMCC_TYPE_D: u8 = 0x0D;
    /// AAC Audio (ADTS).
    pub const AAC_AUDIO: u8 = 0x0F;
    /// H.264/AVC Video.
    pub const H264_VIDEO: u8 = 0x1B;
    /// H.265/HEVC Video.
    pub const H265_VIDEO: u8 = 0x24;

    /// Check whether a stream type carries DSM-CC sections.
    pub fn is_dsmcc(stream_type: u8) -> bool {
        matches!(stream_type, DSMCC_TYPE_B | DSMCC_TYPE_C | DSMCC_TYPE_D)
    }
}

/// One elementary stream entry.
#[derive(Debug, Clone)]
pub struct PmtStream {
    /// Stream type.
    pub stream_type: u8,
    /// Elementary PID.
    pub elementary_pid: u16,
    /// Raw ES-info descriptor loop.
    pub descriptors: Vec<u8>,
}

/// Parse a complete PMT section and install it under `/PMT/0xNNNN/`.
pub fn parse(
    ts: &TsHeader,
    section: &[u8],
    _data: ParserData,
    ctx: &DemuxContext,
) -> Result<(), DemuxError> {
    let section = PsiSection::parse(section)?;
    let header = &section.header;
    if header.table_id != table_id::PMT {
        return Err(DemuxError::UnexpectedTableId(header.table_id));
    }
    if !header.current_next_indicator {
        debug!("PMT: ignoring next-indicator section");
        return Ok(());
    }

    let payload = section.payload;
    if payload.len() < 4 {
        return Err(DemuxError::Truncated {
            what: "PMT fixed fields",
            expected: 4,
            actual: payload.len(),
        });
    }
    let pcr_pid = ((payload[0] as u16 & 0x1F) << 8) | payload[1] as u16;
    let program_info_length = ((payload[2] as usize & 0x0F) << 8) | payload[3] as usize;
    if payload.len() < 4 + program_info_length {
        return Err(DemuxError::Truncated {
            what: "PMT program info",
            expected: 4 + program_info_length,
            actual: payload.len(),
        });
    }
    let program_info = &payload[4..4 + program_info_length];

    let mut streams = Vec::new();
    let mut offset = 4 + program_info_length;
    while offset + 5 <= payload.len() {
        let stype = payload[offset];
        let elementary_pid = ((payload[offset + 1] as u16 & 0x1F) << 8) | payload[offset + 2] as u16;
        let es_info_length =
            ((payload[offset + 3] as usize & 0x0F) << 8) | payload[offset + 4] as usize;
        offset += 5;
        if offset + es_info_length > payload.len() {
            return Err(DemuxError::Truncated {
                what: "PMT ES info",
                expected: offset + es_info_length,
                actual: payload.len(),
            });
        }
        streams.push(PmtStream {
            stream_type: stype,
            elementary_pid,
            descriptors: payload[offset..offset + es_info_length].to_vec(),
        });
        offset += es_info_length;
    }

    register_streams(ctx, &streams);

    match prepare_update(ctx, ts.pid, header) {
        TableUpdate::Duplicate => {
            debug!(
                "PMT {:#06x}: version {} section {} already installed",
                ts.pid, header.version_number, header.section_number
            );
            Ok(())
        }
        TableUpdate::Append(version_dir) => {
            let streams_dir = create_directory(&version_dir, fsnames::STREAMS)?;
            populate_streams(ctx, &streams_dir, &streams)?;
            DemuxStats::bump(&ctx.stats.sections);
            Ok(())
        }
        TableUpdate::New(pending) => {
            create_psi_header_leaves(&pending.dir, header, "program_number")?;
            create_number_leaf(&pending.dir, "pcr_pid", pcr_pid as u64, 2)?;
            if !program_info.is_empty() {
                let descriptors_dir =
                    pending.dir.add_child(Dentry::new_directory("Descriptors"))?;
                create_descriptor_dirs(&ctx.descriptors, &descriptors_dir, program_info)?;
            }
            let streams_dir = pending.dir.add_child(Dentry::new_directory(fsnames::STREAMS))?;
            populate_streams(ctx, &streams_dir, &streams)?;

            let pmt_root = create_directory(&ctx.root, fsnames::PMT)?;
            let table_dir = create_directory(&pmt_root, &format!("0x{:04x}", ts.pid))?;
            publish(ctx, &table_dir, pending)?;
            DemuxStats::bump(&ctx.stats.sections);
            info!(
                "PMT {:#06x}: installed version {} for program {} with {} streams",
                ts.pid,
                header.version_number,
                header.table_id_extension,
                streams.len()
            );
            Ok(())
        }
    }
}

/// Register every announced ES PID with the appropriate side of the
/// dispatcher. Registration is idempotent; PIDs already claimed by a
/// section parser keep their existing entry.
fn register_streams(ctx: &DemuxContext, streams: &[PmtStream]) {
    for stream in streams {
        if stream_type::is_dsmcc(stream.stream_type) {
            ctx.register_psi_parser_if_absent(
                stream.elementary_pid,
                PsiParserEntry {
                    parse: tables::dsmcc::parse,
                    accepts: TableIdFilter::Either(table_id::DII, table_id::DDB),
                    data: ParserData::None,
                },
            );
        } else if stream.stream_type == stream_type::PRIVATE_SECTIONS {
            ctx.register_psi_parser_if_absent(
                stream.elementary_pid,
                PsiParserEntry {
                    parse: tables::others::parse,
                    accepts: TableIdFilter::Exact(table_id::AIT),
                    data: ParserData::TableName("AIT"),
                },
            );
        } else {
            ctx.register_pes_parser(
                stream.elementary_pid,
                PesParserEntry {
                    stream_type: stream.stream_type,
                },
            );
        }
    }
}

/// Build the `Streams/0xNNNN/` directories.
fn populate_streams(
    ctx: &DemuxContext,
    streams_dir: &Arc<Dentry>,
    streams: &[PmtStream],
) -> Result<(), DemuxError> {
    for stream in streams {
        let name = format!("0x{:04x}", stream.elementary_pid);
        if streams_dir.has_child(&name) {
            continue;
        }
        let dir = streams_dir.add_child(Dentry::new_directory(name))?;
        create_number_leaf(&dir, "stream_type", stream.stream_type as u64, 1)?;
        create_number_leaf(&dir, "elementary_pid", stream.elementary_pid as u64, 2)?;
        if !stream.descriptors.is_empty() {
            let descriptors_dir = dir.add_child(Dentry::new_directory("Descriptors"))?;
            create_descriptor_dirs(&ctx.descriptors, &descriptors_dir, &stream.descriptors)?;
        }
    }
    Ok(())
}
