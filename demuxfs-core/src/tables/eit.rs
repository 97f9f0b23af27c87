//! EIT (Event Information Table) parsing.
//!
//! EIT versions arrive in many sections (present/following uses two,
//! schedule tables up to 256), so sections of the installed version merge
//! into the live version directory instead of superseding it.

use std::sync::Arc;

use log::{debug, info};

use crate::byteops::{bcd_duration_secs, be16};
use crate::descriptors::create_descriptor_dirs;
use crate::dispatch::{DemuxContext, DemuxStats, ParserData};
use crate::error::DemuxError;
use crate::fs::fsutils::create_directory;
use crate::fs::render::{create_datetime_leaf, create_flag_leaf, create_number_leaf};
use crate::fs::Dentry;
use crate::packet::TsHeader;
use crate::psi::PsiSection;
use crate::tables::{
    create_psi_header_leaves, fsnames, prepare_update, publish, table_id, TableUpdate,
};

/// One event entry in the EIT loop.
#[derive(Debug, Clone)]
pub struct EitEvent {
    /// Event id.
    pub event_id: u16,
    /// Raw 5-byte MJD/BCD start time.
    pub start_time: [u8; 5],
    /// Raw 3-byte BCD duration.
    pub duration: [u8; 3],
    /// Running status (3 bits).
    pub running_status: u8,
    /// Free CA mode.
    pub free_ca_mode: bool,
    /// Raw event descriptor loop.
    pub descriptors: Vec<u8>,
}

/// Parse a complete EIT section and install it under `/EIT/`.
pub fn parse(
    ts: &TsHeader,
    section: &[u8],
    _data: ParserData,
    ctx: &DemuxContext,
) -> Result<(), DemuxError> {
    let section = PsiSection::parse(section)?;
    let header = &section.header;
    if !(table_id::EIT_FIRST..=table_id::EIT_LAST).contains(&header.table_id) {
        return Err(DemuxError::UnexpectedTableId(header.table_id));
    }
    if !header.current_next_indicator {
        debug!("EIT: ignoring next-indicator section");
        return Ok(());
    }

    let payload = section.payload;
    if payload.len() < 6 {
        return Err(DemuxError::Truncated {
            what: "EIT fixed fields",
            expected: 6,
            actual: payload.len(),
        });
    }
    let transport_stream_id = be16(payload[0], payload[1]);
    let original_network_id = be16(payload[2], payload[3]);
    let segment_last_section_number = payload[4];
    let last_table_id = payload[5];

    let mut events = Vec::new();
    let mut offset = 6;
    while offset + 12 <= payload.len() {
        let event_id = be16(payload[offset], payload[offset + 1]);
        let mut start_time = [0u8; 5];
        start_time.copy_from_slice(&payload[offset + 2..offset + 7]);
        let mut duration = [0u8; 3];
        duration.copy_from_slice(&payload[offset + 7..offset + 10]);
        let running_status = (payload[offset + 10] >> 5) & 0x07;
        let free_ca_mode = payload[offset + 10] & 0x10 != 0;
        let descriptors_length =
            ((payload[offset + 10] as usize & 0x0F) << 8) | payload[offset + 11] as usize;
        offset += 12;
        if offset + descriptors_length > payload.len() {
            return Err(DemuxError::Truncated {
                what: "EIT event descriptors",
                expected: offset + descriptors_length,
                actual: payload.len(),
            });
        }
        events.push(EitEvent {
            event_id,
            start_time,
            duration,
            running_status,
            free_ca_mode,
            descriptors: payload[offset..offset + descriptors_length].to_vec(),
        });
        offset += descriptors_length;
    }

    match prepare_update(ctx, ts.pid, header) {
        TableUpdate::Duplicate => Ok(()),
        TableUpdate::Append(version_dir) => {
            let events_dir = create_directory(&version_dir, "Events")?;
            populate_events(ctx, &events_dir, &events)?;
            DemuxStats::bump(&ctx.stats.sections);
            Ok(())
        }
        TableUpdate::New(pending) => {
            create_psi_header_leaves(&pending.dir, header, "service_id")?;
            create_number_leaf(&pending.dir, "transport_stream_id", transport_stream_id as u64, 2)?;
            create_number_leaf(&pending.dir, "original_network_id", original_network_id as u64, 2)?;
            create_number_leaf(
                &pending.dir,
                "segment_last_section_number",
                segment_last_section_number as u64,
                1,
            )?;
            create_number_leaf(&pending.dir, "last_table_id", last_table_id as u64, 1)?;
            let events_dir = pending.dir.add_child(Dentry::new_directory("Events"))?;
            populate_events(ctx, &events_dir, &events)?;

            let table_dir = create_directory(&ctx.root, fsnames::EIT)?;
            publish(ctx, &table_dir, pending)?;
            DemuxStats::bump(&ctx.stats.sections);
            info!(
                "EIT {:#04x}: installed version {} for service {} with {} events",
                header.table_id,
                header.version_number,
                header.table_id_extension,
                events.len()
            );
            Ok(())
        }
    }
}

fn populate_events(
    ctx: &DemuxContext,
    events_dir: &Arc<Dentry>,
    events: &[EitEvent],
) -> Result<(), DemuxError> {
    for event in events {
        let name = format!("0x{:04x}", event.event_id);
        if events_dir.has_child(&name) {
            continue;
        }
        let dir = events_dir.add_child(Dentry::new_directory(name))?;
        create_number_leaf(&dir, "event_id", event.event_id as u64, 2)?;
        create_datetime_leaf(&dir, "start_time", &event.start_time)?;
        match bcd_duration_secs(&event.duration) {
            Some(seconds) => create_number_leaf(&dir, "duration", seconds as u64, 3)?,
            None => crate::fs::render::create_bin_leaf(&dir, "duration", &event.duration)?,
        };
        create_number_leaf(&dir, "running_status", event.running_status as u64, 1)?;
        create_flag_leaf(&dir, "free_ca_mode", event.free_ca_mode)?;
        if !event.descriptors.is_empty() {
            let descriptors_dir = dir.add_child(Dentry::new_directory("Descriptors"))?;
            create_descriptor_dirs(&ctx.descriptors, &descriptors_dir, &event.descriptors)?;
        }
    }
    Ok(())
}
