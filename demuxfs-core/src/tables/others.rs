//! Generic parser for tables exposed at header level only.
//!
//! ISDB reserves several tables (SDTT, BIT, CDT, AIT and the assorted
//! future-use sections) that this pipeline surfaces without field-level
//! decoding: the PSI header leaves plus the raw payload. The directory name
//! comes from the registration's [`ParserData`].

use log::{debug, info};

use crate::dispatch::{DemuxContext, DemuxStats, ParserData};
use crate::error::DemuxError;
use crate::fs::fsutils::create_directory;
use crate::fs::render::create_bin_leaf;
use crate::packet::TsHeader;
use crate::psi::PsiSection;
use crate::tables::{create_psi_header_leaves, prepare_update, publish, table_id, TableUpdate};

/// Well-known directory name for a header-level table id.
fn default_name(tid: u8) -> &'static str {
    match tid {
        table_id::CAT => "CAT",
        table_id::RST => "RST",
        table_id::ST => "ST",
        table_id::AIT => "AIT",
        table_id::DIT => "DIT",
        table_id::SIT => "SIT",
        table_id::DCT => "DCT",
        table_id::PCAT => "PCAT",
        table_id::SDTT => "SDTT",
        table_id::BIT => "BIT",
        table_id::NBIT_BODY | table_id::NBIT_REF => "NBIT",
        table_id::LDT => "LDT",
        table_id::CDT => "CDT",
        _ => "Private",
    }
}

/// Parse a section of a header-level table into `/<name>/Vnn/`.
pub fn parse(
    ts: &TsHeader,
    section: &[u8],
    data: ParserData,
    ctx: &DemuxContext,
) -> Result<(), DemuxError> {
    let section = PsiSection::parse(section)?;
    let header = &section.header;
    let name = match data {
        ParserData::TableName(name) => name,
        ParserData::None => default_name(header.table_id),
    };
    if !header.current_next_indicator {
        debug!("{name}: ignoring next-indicator section");
        return Ok(());
    }

    match prepare_update(ctx, ts.pid, header) {
        TableUpdate::Duplicate => Ok(()),
        TableUpdate::Append(version_dir) => {
            let leaf = format!("data_{:02}", header.section_number);
            if !version_dir.has_child(&leaf) {
                create_bin_leaf(&version_dir, &leaf, section.payload)?;
            }
            DemuxStats::bump(&ctx.stats.sections);
            Ok(())
        }
        TableUpdate::New(pending) => {
            create_psi_header_leaves(&pending.dir, header, "table_id_extension")?;
            create_bin_leaf(
                &pending.dir,
                &format!("data_{:02}", header.section_number),
                section.payload,
            )?;
            let table_dir = create_directory(&ctx.root, name)?;
            publish(ctx, &table_dir, pending)?;
            DemuxStats::bump(&ctx.stats.sections);
            info!(
                "{name}: installed version {} (table_id {:#04x})",
                header.version_number, header.table_id
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptors::DescriptorRegistry;
    use crate::fs::fsutils::lookup;
    use crate::testutil::build_section;

    #[test]
    fn test_generic_table_header_and_raw_payload() {
        let ctx = DemuxContext::new(DescriptorRegistry::empty());
        let ts = TsHeader {
            transport_error: false,
            payload_unit_start: true,
            transport_priority: false,
            pid: crate::tables::pid::CDT,
            scrambling_control: 0,
            adaptation_field_control: 0x01,
            continuity_counter: 0,
        };
        let section = build_section(0xC8, 0x0001, 4, 0, 0, &[0xDE, 0xAD]);
        parse(&ts, &section, ParserData::TableName("CDT"), &ctx).unwrap();

        assert_eq!(
            lookup(&ctx.root, "/CDT/Current").unwrap().symlink_target().unwrap(),
            "V04"
        );
        assert_eq!(
            lookup(&ctx.root, "/CDT/V04/data_00").unwrap().content(),
            vec![0xDE, 0xAD]
        );
        assert_eq!(
            lookup(&ctx.root, "/CDT/V04/table_id").unwrap().content(),
            b"200".to_vec()
        );
    }

    #[test]
    fn test_directory_name_derived_from_table_id() {
        let ctx = DemuxContext::new(DescriptorRegistry::empty());
        let ts = TsHeader {
            transport_error: false,
            payload_unit_start: true,
            transport_priority: false,
            pid: crate::tables::pid::BIT,
            scrambling_control: 0,
            adaptation_field_control: 0x01,
            continuity_counter: 0,
        };
        let section = build_section(0xC4, 0x0001, 0, 0, 0, &[0x00]);
        parse(&ts, &section, ParserData::None, &ctx).unwrap();
        assert!(lookup(&ctx.root, "/BIT/V00").is_some());
    }
}
