//! SDT (Service Description Table) parsing.

use std::sync::Arc;

use log::{debug, info};

use crate::byteops::be16;
use crate::descriptors::create_descriptor_dirs;
use crate::dispatch::{DemuxContext, DemuxStats, ParserData};
use crate::error::DemuxError;
use crate::fs::fsutils::create_directory;
use crate::fs::render::{create_flag_leaf, create_number_leaf};
use crate::fs::Dentry;
use crate::packet::TsHeader;
use crate::psi::PsiSection;
use crate::tables::{
    create_psi_header_leaves, fsnames, prepare_update, publish, table_id, TableUpdate,
};

/// One service entry in the SDT loop.
#[derive(Debug, Clone)]
pub struct SdtService {
    /// Service id.
    pub service_id: u16,
    /// EIT schedule flag.
    pub eit_schedule_flag: bool,
    /// EIT present/following flag.
    pub eit_present_following_flag: bool,
    /// Running status (3 bits).
    pub running_status: u8,
    /// Free CA mode.
    pub free_ca_mode: bool,
    /// Raw service descriptor loop.
    pub descriptors: Vec<u8>,
}

/// Parse a complete SDT section and install it under `/SDT/`.
pub fn parse(
    ts: &TsHeader,
    section: &[u8],
    _data: ParserData,
    ctx: &DemuxContext,
) -> Result<(), DemuxError> {
    let section = PsiSection::parse(section)?;
    let header = &section.header;
    if header.table_id != table_id::SDT {
        return Err(DemuxError::UnexpectedTableId(header.table_id));
    }
    if !header.current_next_indicator {
        debug!("SDT: ignoring next-indicator section");
        return Ok(());
    }

    let payload = section.payload;
    if payload.len() < 3 {
        return Err(DemuxError::Truncated {
            what: "SDT fixed fields",
            expected: 3,
            actual: payload.len(),
        });
    }
    let original_network_id = be16(payload[0], payload[1]);

    let mut services = Vec::new();
    let mut offset = 3;
    while offset + 5 <= payload.len() {
        let service_id = be16(payload[offset], payload[offset + 1]);
        let eit_schedule_flag = payload[offset + 2] & 0x02 != 0;
        let eit_present_following_flag = payload[offset + 2] & 0x01 != 0;
        let running_status = (payload[offset + 3] >> 5) & 0x07;
        let free_ca_mode = payload[offset + 3] & 0x10 != 0;
        let descriptors_length =
            ((payload[offset + 3] as usize & 0x0F) << 8) | payload[offset + 4] as usize;
        offset += 5;
        if offset + descriptors_length > payload.len() {
            return Err(DemuxError::Truncated {
                what: "SDT service descriptors",
                expected: offset + descriptors_length,
                actual: payload.len(),
            });
        }
        services.push(SdtService {
            service_id,
            eit_schedule_flag,
            eit_present_following_flag,
            running_status,
            free_ca_mode,
            descriptors: payload[offset..offset + descriptors_length].to_vec(),
        });
        offset += descriptors_length;
    }

    match prepare_update(ctx, ts.pid, header) {
        TableUpdate::Duplicate => Ok(()),
        TableUpdate::Append(version_dir) => {
            let services_dir = create_directory(&version_dir, "Services")?;
            populate_services(ctx, &services_dir, &services)?;
            DemuxStats::bump(&ctx.stats.sections);
            Ok(())
        }
        TableUpdate::New(pending) => {
            create_psi_header_leaves(&pending.dir, header, "transport_stream_id")?;
            create_number_leaf(&pending.dir, "original_network_id", original_network_id as u64, 2)?;
            let services_dir = pending.dir.add_child(Dentry::new_directory("Services"))?;
            populate_services(ctx, &services_dir, &services)?;

            let table_dir = create_directory(&ctx.root, fsnames::SDT)?;
            publish(ctx, &table_dir, pending)?;
            DemuxStats::bump(&ctx.stats.sections);
            info!(
                "SDT: installed version {} with {} services",
                header.version_number,
                services.len()
            );
            Ok(())
        }
    }
}

fn populate_services(
    ctx: &DemuxContext,
    services_dir: &Arc<Dentry>,
    services: &[SdtService],
) -> Result<(), DemuxError> {
    for service in services {
        let name = format!("0x{:04x}", service.service_id);
        if services_dir.has_child(&name) {
            continue;
        }
        let dir = services_dir.add_child(Dentry::new_directory(name))?;
        create_number_leaf(&dir, "service_id", service.service_id as u64, 2)?;
        create_flag_leaf(&dir, "eit_schedule_flag", service.eit_schedule_flag)?;
        create_flag_leaf(
            &dir,
            "eit_present_following_flag",
            service.eit_present_following_flag,
        )?;
        create_number_leaf(&dir, "running_status", service.running_status as u64, 1)?;
        create_flag_leaf(&dir, "free_ca_mode", service.free_ca_mode)?;
        if !service.descriptors.is_empty() {
            let descriptors_dir = dir.add_child(Dentry::new_directory("Descriptors"))?;
            create_descriptor_dirs(&ctx.descriptors, &descriptors_dir, &service.descriptors)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::DescriptorRegistry;
    use crate::fs::fsutils::lookup;
    use crate::testutil::build_section;

    fn sdt_ts_header() -> TsHeader {
        TsHeader {
            transport_error: false,
            payload_unit_start: true,
            transport_priority: false,
            pid: crate::tables::pid::SDT,
            scrambling_control: 0,
            adaptation_field_control: 0x01,
            continuity_counter: 0,
        }
    }

    #[test]
    fn test_sdt_service_with_descriptor() {
        let ctx = DemuxContext::new(DescriptorRegistry::builtin());
        // original_network_id, reserved, one running service with a service
        // descriptor.
        let service_descriptor = [
            0x48, 0x0A, 0x01, 0x03, b'N', b'H', b'K', 0x04, b'T', b'E', b'S', b'T',
        ];
        let mut payload = vec![0x7F, 0xE0, 0xFF];
        payload.extend_from_slice(&[0x04, 0x08, 0xFC]);
        payload.push(0x80 | ((service_descriptor.len() >> 8) as u8 & 0x0F));
        payload.push(service_descriptor.len() as u8);
        payload.extend_from_slice(&service_descriptor);
        let section = build_section(0x42, 0x7FE1, 0, 0, 0, &payload);

        parse(&sdt_ts_header(), &section, ParserData::None, &ctx).unwrap();

        let service = lookup(&ctx.root, "/SDT/V00/Services/0x0408").unwrap();
        assert_eq!(service.get_child("running_status").unwrap().content(), b"4".to_vec());
        assert_eq!(service.get_child("free_ca_mode").unwrap().content(), b"0".to_vec());
        assert_eq!(
            lookup(&ctx.root, "/SDT/V00/Services/0x0408/Descriptors/descriptor_01/service_name")
                .unwrap()
                .content(),
            b"TEST".to_vec()
        );
        assert_eq!(
            lookup(&ctx.root, "/SDT/V00/original_network_id").unwrap().content(),
            b"32736".to_vec()
        );
    }
}
