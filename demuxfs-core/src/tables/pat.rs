//! PAT (Program Association Table) parsing.
//!
//! The PAT maps program numbers to PMT PIDs (and program 0 to the network
//! PID). Accepting a PAT seeds the dispatcher with the announced PIDs and
//! cross-links every program into the PMT (or NIT) tree.

use std::sync::Arc;

use log::{debug, info};

use crate::dispatch::{
    DemuxContext, DemuxStats, ParserData, PsiParserEntry, TableIdFilter,
};
use crate::error::DemuxError;
use crate::fs::fsutils::create_directory;
use crate::fs::render::create_symlink;
use crate::fs::Dentry;
use crate::packet::TsHeader;
use crate::psi::PsiSection;
use crate::tables::{
    self, create_psi_header_leaves, fsnames, prepare_update, publish, table_id, TableUpdate,
};

/// One `{program_number, pid}` association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatProgram {
    /// Program number; 0 announces the network PID.
    pub program_number: u16,
    /// PMT PID, or network PID for program 0.
    pub pid: u16,
}

/// Parse a complete PAT section and install it.
pub fn parse(
    ts: &TsHeader,
    section: &[u8],
    _data: ParserData,
    ctx: &DemuxContext,
) -> Result<(), DemuxError> {
    let section = PsiSection::parse(section)?;
    let header = &section.header;
    if header.table_id != table_id::PAT {
        return Err(DemuxError::UnexpectedTableId(header.table_id));
    }
    if !header.current_next_indicator {
        debug!("PAT: ignoring next-indicator section");
        return Ok(());
    }

    // section_length covers 5 header bytes, the program loop and the CRC.
    let num_programs = (header.section_length as usize).saturating_sub(9) / 4;
    let needed = num_programs * 4;
    if section.payload.len() < needed {
        return Err(DemuxError::Truncated {
            what: "PAT program loop",
            expected: needed,
            actual: section.payload.len(),
        });
    }
    let mut programs = Vec::with_capacity(num_programs);
    for chunk in section.payload[..needed].chunks_exact(4) {
        programs.push(PatProgram {
            program_number: u16::from_be_bytes([chunk[0], chunk[1]]),
            pid: ((chunk[2] as u16 & 0x1F) << 8) | chunk[3] as u16,
        });
    }

    // Seed the dispatcher before touching the tree: the announced PIDs are
    // valid no matter how this section is installed. Replacement is
    // idempotent and spurious registrations from prior versions stay.
    for program in &programs {
        if ctx.has_psi_parser(program.pid) {
            continue;
        }
        let entry = if program.program_number == 0 {
            PsiParserEntry {
                parse: tables::nit::parse,
                accepts: TableIdFilter::Either(table_id::NIT, table_id::NIT_OTHER),
                data: ParserData::None,
            }
        } else {
            PsiParserEntry {
                parse: tables::pmt::parse,
                accepts: TableIdFilter::Exact(table_id::PMT),
                data: ParserData::None,
            }
        };
        ctx.register_psi_parser(program.pid, entry);
    }

    match prepare_update(ctx, ts.pid, header) {
        TableUpdate::Duplicate => {
            debug!(
                "PAT: version {} section {} already installed",
                header.version_number, header.section_number
            );
            Ok(())
        }
        TableUpdate::Append(version_dir) => {
            let programs_dir = create_directory(&version_dir, fsnames::PROGRAMS)?;
            link_programs(&programs_dir, &programs)?;
            DemuxStats::bump(&ctx.stats.sections);
            Ok(())
        }
        TableUpdate::New(pending) => {
            create_psi_header_leaves(&pending.dir, header, "transport_stream_id")?;
            let programs_dir = pending.dir.add_child(Dentry::new_directory(fsnames::PROGRAMS))?;
            link_programs(&programs_dir, &programs)?;

            let table_dir = create_directory(&ctx.root, fsnames::PAT)?;
            publish(ctx, &table_dir, pending)?;
            DemuxStats::bump(&ctx.stats.sections);
            info!(
                "PAT: installed version {} with {} programs",
                header.version_number,
                programs.len()
            );
            Ok(())
        }
    }
}

/// Create one symlink per program, targeting the owning table's `Current`.
fn link_programs(programs_dir: &Arc<Dentry>, programs: &[PatProgram]) -> Result<(), DemuxError> {
    for program in programs {
        let name = format!("0x{:04x}", program.program_number);
        if programs_dir.has_child(&name) {
            continue;
        }
        let target = if program.program_number == 0 {
            format!("../../../{}/{}", fsnames::NIT, fsnames::CURRENT)
        } else {
            format!(
                "../../../{}/0x{:04x}/{}",
                fsnames::PMT,
                program.pid,
                fsnames::CURRENT
            )
        };
        create_symlink(programs_dir, &name, &target)?;
    }
    Ok(())
}
