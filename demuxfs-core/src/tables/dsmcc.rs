//! DSM-CC section parsing: DII (Download Info Indication) and DDB
//! (Download Data Block).
//!
//! Both arrive as long sections on PIDs announced by the PMT. A DII starts
//! with the dsmccMessageHeader (transaction_id variant), a DDB with the
//! dsmccDownloadDataHeader (download_id variant); the headers share their
//! 12-byte layout plus an optional adaptation field. The DII additionally
//! carries a compatibility descriptor whose nested structure is mirrored as
//! `descriptor_NN/sub_descriptor_MM/` directories.

use std::sync::Arc;

use log::{debug, info};

use crate::byteops::{be16, be32};
use crate::dispatch::{DemuxContext, DemuxStats, ParserData};
use crate::error::DemuxError;
use crate::fs::fsutils::create_directory;
use crate::fs::render::{create_bin_leaf, create_number_leaf};
use crate::fs::Dentry;
use crate::packet::TsHeader;
use crate::psi::PsiSection;
use crate::tables::{
    create_psi_header_leaves, fsnames, prepare_update, publish, table_id, TableUpdate,
};

/// The dsmccMessageHeader / dsmccDownloadDataHeader, which differ only in
/// the meaning of the 32-bit id at offset 4.
#[derive(Debug, Clone)]
pub struct DsmccHeader {
    /// Protocol discriminator, always 0x11 for MPEG-2 DSM-CC.
    pub protocol_discriminator: u8,
    /// DSM-CC type (0x03 U-N download messages).
    pub dsmcc_type: u8,
    /// Message id.
    pub message_id: u16,
    /// transaction_id for message headers, download_id for data headers.
    pub id: u32,
    /// Adaptation field length.
    pub adaptation_length: u8,
    /// Message length (bytes after the header and adaptation field).
    pub message_length: u16,
    /// Adaptation type, when an adaptation field is present.
    pub adaptation_type: Option<u8>,
    /// Adaptation payload after the type byte.
    pub adaptation_data: Vec<u8>,
}

impl DsmccHeader {
    /// Parse the 12-byte header plus adaptation field.
    ///
    /// Returns the header and the offset of the first byte past it.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), DemuxError> {
        if data.len() < 12 {
            return Err(DemuxError::Truncated {
                what: "DSM-CC header",
                expected: 12,
                actual: data.len(),
            });
        }
        let adaptation_length = data[9];
        let mut header = DsmccHeader {
            protocol_discriminator: data[0],
            dsmcc_type: data[1],
            message_id: be16(data[2], data[3]),
            id: be32(data[4], data[5], data[6], data[7]),
            adaptation_length,
            message_length: be16(data[10], data[11]),
            adaptation_type: None,
            adaptation_data: Vec::new(),
        };
        let mut offset = 12;
        if adaptation_length > 0 {
            let end = 12 + adaptation_length as usize;
            if data.len() < end {
                return Err(DemuxError::Truncated {
                    what: "DSM-CC adaptation field",
                    expected: end,
                    actual: data.len(),
                });
            }
            header.adaptation_type = Some(data[12]);
            header.adaptation_data = data[13..end].to_vec();
            offset = end;
        }
        Ok((header, offset))
    }

    /// Create the header leaves, naming the 32-bit id field per variant.
    fn populate(&self, parent: &Arc<Dentry>, id_field: &'static str) -> Result<(), DemuxError> {
        create_number_leaf(parent, "protocol_discriminator", self.protocol_discriminator as u64, 1)?;
        create_number_leaf(parent, "dsmcc_type", self.dsmcc_type as u64, 1)?;
        create_number_leaf(parent, "message_id", self.message_id as u64, 2)?;
        create_number_leaf(parent, id_field, self.id as u64, 4)?;
        create_number_leaf(parent, "adaptation_length", self.adaptation_length as u64, 1)?;
        create_number_leaf(parent, "message_length", self.message_length as u64, 2)?;
        if let Some(adaptation_type) = self.adaptation_type {
            create_number_leaf(parent, "adaptation_type", adaptation_type as u64, 1)?;
            if !self.adaptation_data.is_empty() {
                create_bin_leaf(parent, "adaptation_data_bytes", &self.adaptation_data)?;
            }
        }
        Ok(())
    }
}

/// Parse the compatibility descriptor at `data`, mirroring its nested
/// structure under `parent`. Returns the number of bytes consumed.
pub fn parse_compatibility_descriptor(
    data: &[u8],
    parent: &Arc<Dentry>,
) -> Result<usize, DemuxError> {
    if data.len() < 4 {
        return Err(DemuxError::Truncated {
            what: "compatibility descriptor",
            expected: 4,
            actual: data.len(),
        });
    }
    let compatibility_descriptor_length = be16(data[0], data[1]) as usize;
    if data.len() < 2 + compatibility_descriptor_length {
        return Err(DemuxError::Truncated {
            what: "compatibility descriptor body",
            expected: 2 + compatibility_descriptor_length,
            actual: data.len(),
        });
    }
    let descriptor_count = be16(data[2], data[3]);

    create_number_leaf(
        parent,
        "compatibility_descriptor_length",
        compatibility_descriptor_length as u64,
        2,
    )?;
    create_number_leaf(parent, "descriptor_count", descriptor_count as u64, 2)?;

    let mut offset = 4;
    for index in 1..=descriptor_count {
        if data.len() < offset + 11 {
            return Err(DemuxError::Truncated {
                what: "compatibility sub-structure",
                expected: offset + 11,
                actual: data.len(),
            });
        }
        let descriptor_type = data[offset];
        let descriptor_length = data[offset + 1];
        let specifier_type = data[offset + 2];
        let specifier_data = &data[offset + 3..offset + 6];
        let model = be16(data[offset + 6], data[offset + 7]);
        let version = be16(data[offset + 8], data[offset + 9]);
        let sub_descriptor_count = data[offset + 10];
        offset += 11;

        let dir = parent.add_child(Dentry::new_directory(format!("descriptor_{index:02}")))?;
        create_number_leaf(&dir, "descriptor_type", descriptor_type as u64, 1)?;
        create_number_leaf(&dir, "descriptor_length", descriptor_length as u64, 1)?;
        create_number_leaf(&dir, "specifier_type", specifier_type as u64, 1)?;
        create_bin_leaf(&dir, "specifier_data", specifier_data)?;
        create_number_leaf(&dir, "model", model as u64, 2)?;
        create_number_leaf(&dir, "version", version as u64, 2)?;
        create_number_leaf(&dir, "sub_descriptor_count", sub_descriptor_count as u64, 1)?;

        for sub_index in 1..=sub_descriptor_count {
            if data.len() < offset + 2 {
                return Err(DemuxError::Truncated {
                    what: "sub-descriptor",
                    expected: offset + 2,
                    actual: data.len(),
                });
            }
            let sub_descriptor_type = data[offset];
            let sub_descriptor_length = data[offset + 1] as usize;
            offset += 2;
            if data.len() < offset + sub_descriptor_length {
                return Err(DemuxError::Truncated {
                    what: "sub-descriptor payload",
                    expected: offset + sub_descriptor_length,
                    actual: data.len(),
                });
            }
            let sub_dir =
                dir.add_child(Dentry::new_directory(format!("sub_descriptor_{sub_index:02}")))?;
            create_number_leaf(&sub_dir, "sub_descriptor_type", sub_descriptor_type as u64, 1)?;
            create_number_leaf(&sub_dir, "sub_descriptor_length", sub_descriptor_length as u64, 1)?;
            if sub_descriptor_length > 0 {
                create_bin_leaf(
                    &sub_dir,
                    "additional_information",
                    &data[offset..offset + sub_descriptor_length],
                )?;
            }
            offset += sub_descriptor_length;
        }
    }
    Ok(2 + compatibility_descriptor_length)
}

/// Parse a DII or DDB section and install it under `/DSM-CC/0xNNNN/`.
pub fn parse(
    ts: &TsHeader,
    section: &[u8],
    _data: ParserData,
    ctx: &DemuxContext,
) -> Result<(), DemuxError> {
    let section = PsiSection::parse(section)?;
    let header = &section.header;
    if !header.current_next_indicator {
        debug!("DSM-CC: ignoring next-indicator section");
        return Ok(());
    }

    match header.table_id {
        table_id::DII => parse_dii(ts, &section, ctx),
        table_id::DDB => parse_ddb(ts, &section, ctx),
        other => Err(DemuxError::UnexpectedTableId(other)),
    }
}

fn dsmcc_table_dir(ctx: &DemuxContext, pid: u16) -> Result<Arc<Dentry>, DemuxError> {
    let dsmcc_root = create_directory(&ctx.root, fsnames::DSMCC)?;
    Ok(create_directory(&dsmcc_root, &format!("0x{pid:04x}"))?)
}

fn parse_dii(
    ts: &TsHeader,
    section: &PsiSection<'_>,
    ctx: &DemuxContext,
) -> Result<(), DemuxError> {
    let header = &section.header;
    let payload = section.payload;
    let (message_header, mut offset) = DsmccHeader::parse(payload)?;

    if payload.len() < offset + 16 {
        return Err(DemuxError::Truncated {
            what: "DII fixed fields",
            expected: offset + 16,
            actual: payload.len(),
        });
    }
    let download_id = be32(
        payload[offset],
        payload[offset + 1],
        payload[offset + 2],
        payload[offset + 3],
    );
    let block_size = be16(payload[offset + 4], payload[offset + 5]);
    let window_size = payload[offset + 6];
    let ack_period = payload[offset + 7];
    let t_c_download_window = be32(
        payload[offset + 8],
        payload[offset + 9],
        payload[offset + 10],
        payload[offset + 11],
    );
    let t_c_download_scenario = be32(
        payload[offset + 12],
        payload[offset + 13],
        payload[offset + 14],
        payload[offset + 15],
    );
    offset += 16;

    match prepare_update(ctx, ts.pid, header) {
        TableUpdate::Duplicate => Ok(()),
        // A DII is one section per transaction; a second section number of
        // the same version has nothing more to add.
        TableUpdate::Append(_) => Ok(()),
        TableUpdate::New(pending) => {
            create_psi_header_leaves(&pending.dir, header, "table_id_extension")?;
            let message_dir = pending.dir.add_child(Dentry::new_directory("MessageHeader"))?;
            message_header.populate(&message_dir, "transaction_id")?;

            create_number_leaf(&pending.dir, "download_id", download_id as u64, 4)?;
            create_number_leaf(&pending.dir, "block_size", block_size as u64, 2)?;
            create_number_leaf(&pending.dir, "window_size", window_size as u64, 1)?;
            create_number_leaf(&pending.dir, "ack_period", ack_period as u64, 1)?;
            create_number_leaf(&pending.dir, "t_c_download_window", t_c_download_window as u64, 4)?;
            create_number_leaf(
                &pending.dir,
                "t_c_download_scenario",
                t_c_download_scenario as u64,
                4,
            )?;

            let compat_dir =
                pending.dir.add_child(Dentry::new_directory("CompatibilityDescriptor"))?;
            offset += parse_compatibility_descriptor(&payload[offset..], &compat_dir)?;

            populate_modules(&pending.dir, payload, offset)?;

            let table_dir = dsmcc_table_dir(ctx, ts.pid)?;
            publish(ctx, &table_dir, pending)?;
            DemuxStats::bump(&ctx.stats.sections);
            info!(
                "DII {:#06x}: installed transaction {:#010x}, download {:#010x}",
                ts.pid, message_header.id, download_id
            );
            Ok(())
        }
    }
}

/// Module loop of a DII: `{module_id, module_size, module_version,
/// module_info}` entries under `Modules/`.
fn populate_modules(
    parent: &Arc<Dentry>,
    payload: &[u8],
    mut offset: usize,
) -> Result<(), DemuxError> {
    if payload.len() < offset + 2 {
        return Err(DemuxError::Truncated {
            what: "DII module count",
            expected: offset + 2,
            actual: payload.len(),
        });
    }
    let number_of_modules = be16(payload[offset], payload[offset + 1]);
    create_number_leaf(parent, "number_of_modules", number_of_modules as u64, 2)?;
    offset += 2;

    let modules_dir = parent.add_child(Dentry::new_directory("Modules"))?;
    for _ in 0..number_of_modules {
        if payload.len() < offset + 8 {
            return Err(DemuxError::Truncated {
                what: "DII module entry",
                expected: offset + 8,
                actual: payload.len(),
            });
        }
        let module_id = be16(payload[offset], payload[offset + 1]);
        let module_size = be32(
            payload[offset + 2],
            payload[offset + 3],
            payload[offset + 4],
            payload[offset + 5],
        );
        let module_version = payload[offset + 6];
        let module_info_length = payload[offset + 7] as usize;
        offset += 8;
        if payload.len() < offset + module_info_length {
            return Err(DemuxError::Truncated {
                what: "DII module info",
                expected: offset + module_info_length,
                actual: payload.len(),
            });
        }

        let dir = modules_dir.add_child(Dentry::new_directory(format!("0x{module_id:04x}")))?;
        create_number_leaf(&dir, "module_id", module_id as u64, 2)?;
        create_number_leaf(&dir, "module_size", module_size as u64, 4)?;
        create_number_leaf(&dir, "module_version", module_version as u64, 1)?;
        create_number_leaf(&dir, "module_info_length", module_info_length as u64, 1)?;
        if module_info_length > 0 {
            create_bin_leaf(&dir, "module_info", &payload[offset..offset + module_info_length])?;
        }
        offset += module_info_length;
    }
    Ok(())
}

fn parse_ddb(
    ts: &TsHeader,
    section: &PsiSection<'_>,
    ctx: &DemuxContext,
) -> Result<(), DemuxError> {
    let header = &section.header;
    let payload = section.payload;
    let (data_header, offset) = DsmccHeader::parse(payload)?;

    if payload.len() < offset + 6 {
        return Err(DemuxError::Truncated {
            what: "DDB block header",
            expected: offset + 6,
            actual: payload.len(),
        });
    }
    let module_id = be16(payload[offset], payload[offset + 1]);
    let module_version = payload[offset + 2];
    let block_number = be16(payload[offset + 4], payload[offset + 5]);
    let block_data = &payload[offset + 6..];

    match prepare_update(ctx, ts.pid, header) {
        TableUpdate::Duplicate => Ok(()),
        TableUpdate::Append(version_dir) => {
            let blocks_dir = create_directory(&version_dir, "Blocks")?;
            populate_block(&blocks_dir, module_id, module_version, block_number, block_data)?;
            DemuxStats::bump(&ctx.stats.sections);
            Ok(())
        }
        TableUpdate::New(pending) => {
            create_psi_header_leaves(&pending.dir, header, "table_id_extension")?;
            let message_dir =
                pending.dir.add_child(Dentry::new_directory("DownloadDataHeader"))?;
            data_header.populate(&message_dir, "download_id")?;
            let blocks_dir = pending.dir.add_child(Dentry::new_directory("Blocks"))?;
            populate_block(&blocks_dir, module_id, module_version, block_number, block_data)?;

            let table_dir = dsmcc_table_dir(ctx, ts.pid)?;
            publish(ctx, &table_dir, pending)?;
            DemuxStats::bump(&ctx.stats.sections);
            info!(
                "DDB {:#06x}: installed download {:#010x}, module {:#06x}",
                ts.pid, data_header.id, module_id
            );
            Ok(())
        }
    }
}

fn populate_block(
    blocks_dir: &Arc<Dentry>,
    module_id: u16,
    module_version: u8,
    block_number: u16,
    block_data: &[u8],
) -> Result<(), DemuxError> {
    let name = format!("module_0x{module_id:04x}_block_0x{block_number:04x}");
    if blocks_dir.has_child(&name) {
        return Ok(());
    }
    let dir = blocks_dir.add_child(Dentry::new_directory(name))?;
    create_number_leaf(&dir, "module_id", module_id as u64, 2)?;
    create_number_leaf(&dir, "module_version", module_version as u64, 1)?;
    create_number_leaf(&dir, "block_number", block_number as u64, 2)?;
    create_bin_leaf(&dir, "block_data_bytes", block_data)?;
    Ok(())
}
