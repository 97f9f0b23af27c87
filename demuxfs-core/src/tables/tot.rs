//! TDT (Time and Date Table) and TOT (Time Offset Table) parsing.
//!
//! Both carry a single MJD/BCD timestamp; the TOT adds a descriptor loop
//! and a CRC. The TDT is a short section with no version number, so each
//! arrival refreshes the `utc_time` leaf of the lone `V00` directory
//! instead of installing a new version.

use std::sync::Arc;

use log::{debug, info};

use crate::descriptors::create_descriptor_dirs;
use crate::dispatch::{DemuxContext, DemuxStats, ParserData};
use crate::error::DemuxError;
use crate::fs::fsutils::create_directory;
use crate::fs::render::{create_datetime_leaf, create_number_leaf};
use crate::fs::Dentry;
use crate::packet::TsHeader;
use crate::psi::PsiSection;
use crate::tables::{fsnames, prepare_update, publish, table_id, TableUpdate};

/// Parse a TDT or TOT section, installing under `/TDT/` or `/TOT/`.
pub fn parse(
    ts: &TsHeader,
    section: &[u8],
    _data: ParserData,
    ctx: &DemuxContext,
) -> Result<(), DemuxError> {
    let section = PsiSection::parse(section)?;
    let header = &section.header;

    let (name, has_descriptors) = match header.table_id {
        table_id::TDT => (fsnames::TDT, false),
        table_id::TOT => (fsnames::TOT, true),
        other => return Err(DemuxError::UnexpectedTableId(other)),
    };

    let payload = section.payload;
    if payload.len() < 5 {
        return Err(DemuxError::Truncated {
            what: "time section",
            expected: 5,
            actual: payload.len(),
        });
    }
    let utc_time = &payload[..5];

    let descriptors = if has_descriptors {
        if payload.len() < 7 {
            return Err(DemuxError::Truncated {
                what: "TOT descriptor loop length",
                expected: 7,
                actual: payload.len(),
            });
        }
        let length = ((payload[5] as usize & 0x0F) << 8) | payload[6] as usize;
        if payload.len() < 7 + length {
            return Err(DemuxError::Truncated {
                what: "TOT descriptor loop",
                expected: 7 + length,
                actual: payload.len(),
            });
        }
        &payload[7..7 + length]
    } else {
        &[]
    };

    match prepare_update(ctx, ts.pid, header) {
        TableUpdate::New(pending) => {
            create_number_leaf(&pending.dir, "table_id", header.table_id as u64, 1)?;
            create_number_leaf(&pending.dir, "section_length", header.section_length as u64, 2)?;
            create_datetime_leaf(&pending.dir, "utc_time", utc_time)?;
            if !descriptors.is_empty() {
                let descriptors_dir =
                    pending.dir.add_child(Dentry::new_directory("Descriptors"))?;
                create_descriptor_dirs(&ctx.descriptors, &descriptors_dir, descriptors)?;
            }
            let table_dir = create_directory(&ctx.root, name)?;
            publish(ctx, &table_dir, pending)?;
            DemuxStats::bump(&ctx.stats.sections);
            info!("{name}: installed clock reference");
            Ok(())
        }
        TableUpdate::Duplicate | TableUpdate::Append(_) => {
            // Short sections have no version numbers: refresh the clock
            // leaf in place.
            if let Some(version_dir) = version_dir(ctx, name) {
                version_dir.remove_child("utc_time");
                create_datetime_leaf(&version_dir, "utc_time", utc_time)?;
                DemuxStats::bump(&ctx.stats.sections);
                debug!("{name}: refreshed clock reference");
            }
            Ok(())
        }
    }
}

fn version_dir(ctx: &DemuxContext, name: &str) -> Option<Arc<Dentry>> {
    ctx.root.get_child(name)?.get_child("V00")
}
