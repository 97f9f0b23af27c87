//! NIT (Network Information Table) parsing.

use std::sync::Arc;

use log::{debug, info};

use crate::byteops::be16;
use crate::descriptors::create_descriptor_dirs;
use crate::dispatch::{DemuxContext, DemuxStats, ParserData};
use crate::error::DemuxError;
use crate::fs::fsutils::create_directory;
use crate::fs::render::create_number_leaf;
use crate::fs::Dentry;
use crate::packet::TsHeader;
use crate::psi::PsiSection;
use crate::tables::{
    create_psi_header_leaves, fsnames, prepare_update, publish, table_id, TableUpdate,
};

/// One transport stream entry in the NIT loop.
#[derive(Debug, Clone)]
pub struct NitTransport {
    /// Transport stream id.
    pub transport_stream_id: u16,
    /// Original network id.
    pub original_network_id: u16,
    /// Raw transport descriptor loop.
    pub descriptors: Vec<u8>,
}

/// Parse a complete NIT section and install it under `/NIT/`.
pub fn parse(
    ts: &TsHeader,
    section: &[u8],
    _data: ParserData,
    ctx: &DemuxContext,
) -> Result<(), DemuxError> {
    let section = PsiSection::parse(section)?;
    let header = &section.header;
    if header.table_id != table_id::NIT && header.table_id != table_id::NIT_OTHER {
        return Err(DemuxError::UnexpectedTableId(header.table_id));
    }
    if !header.current_next_indicator {
        debug!("NIT: ignoring next-indicator section");
        return Ok(());
    }

    let payload = section.payload;
    if payload.len() < 2 {
        return Err(DemuxError::Truncated {
            what: "NIT fixed fields",
            expected: 2,
            actual: payload.len(),
        });
    }
    let network_descriptors_length = ((payload[0] as usize & 0x0F) << 8) | payload[1] as usize;
    if payload.len() < 2 + network_descriptors_length + 2 {
        return Err(DemuxError::Truncated {
            what: "NIT network descriptors",
            expected: 2 + network_descriptors_length + 2,
            actual: payload.len(),
        });
    }
    let network_descriptors = &payload[2..2 + network_descriptors_length];

    let mut offset = 2 + network_descriptors_length + 2; // skip ts loop length
    let mut transports = Vec::new();
    while offset + 6 <= payload.len() {
        let transport_stream_id = be16(payload[offset], payload[offset + 1]);
        let original_network_id = be16(payload[offset + 2], payload[offset + 3]);
        let descriptors_length =
            ((payload[offset + 4] as usize & 0x0F) << 8) | payload[offset + 5] as usize;
        offset += 6;
        if offset + descriptors_length > payload.len() {
            return Err(DemuxError::Truncated {
                what: "NIT transport descriptors",
                expected: offset + descriptors_length,
                actual: payload.len(),
            });
        }
        transports.push(NitTransport {
            transport_stream_id,
            original_network_id,
            descriptors: payload[offset..offset + descriptors_length].to_vec(),
        });
        offset += descriptors_length;
    }

    match prepare_update(ctx, ts.pid, header) {
        TableUpdate::Duplicate => Ok(()),
        TableUpdate::Append(version_dir) => {
            let ts_dir = create_directory(&version_dir, "TransportStreams")?;
            populate_transports(ctx, &ts_dir, &transports)?;
            DemuxStats::bump(&ctx.stats.sections);
            Ok(())
        }
        TableUpdate::New(pending) => {
            create_psi_header_leaves(&pending.dir, header, "network_id")?;
            if !network_descriptors.is_empty() {
                let descriptors_dir =
                    pending.dir.add_child(Dentry::new_directory("Descriptors"))?;
                create_descriptor_dirs(&ctx.descriptors, &descriptors_dir, network_descriptors)?;
            }
            let ts_dir = pending.dir.add_child(Dentry::new_directory("TransportStreams"))?;
            populate_transports(ctx, &ts_dir, &transports)?;

            let table_dir = create_directory(&ctx.root, fsnames::NIT)?;
            publish(ctx, &table_dir, pending)?;
            DemuxStats::bump(&ctx.stats.sections);
            info!(
                "NIT: installed version {} for network {} with {} transports",
                header.version_number,
                header.table_id_extension,
                transports.len()
            );
            Ok(())
        }
    }
}

fn populate_transports(
    ctx: &DemuxContext,
    ts_dir: &Arc<Dentry>,
    transports: &[NitTransport],
) -> Result<(), DemuxError> {
    for transport in transports {
        let name = format!("0x{:04x}", transport.transport_stream_id);
        if ts_dir.has_child(&name) {
            continue;
        }
        let dir = ts_dir.add_child(Dentry::new_directory(name))?;
        create_number_leaf(&dir, "transport_stream_id", transport.transport_stream_id as u64, 2)?;
        create_number_leaf(&dir, "original_network_id", transport.original_network_id as u64, 2)?;
        if !transport.descriptors.is_empty() {
            let descriptors_dir = dir.add_child(Dentry::new_directory("Descriptors"))?;
            create_descriptor_dirs(&ctx.descriptors, &descriptors_dir, &transport.descriptors)?;
        }
    }
    Ok(())
}
