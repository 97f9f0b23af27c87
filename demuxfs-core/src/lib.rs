//! ISDB-Tb transport stream demultiplexer with a filesystem-shaped output.
//!
//! This crate ingests an MPEG-2 Transport Stream (ABNT NBR 15603-1) and
//! exposes its PSI/SI and DSM-CC signalling tables as a browsable, read-only
//! tree held in memory: every table version becomes a `Vnn/` directory of
//! leaf files holding parsed field values, a per-table `Current` symlink
//! tracks the active version, and cross-table references (PAT programs to
//! PMTs, program 0 to the NIT) are symlinks. A filesystem adapter can
//! project the tree onto the OS VFS; the tree is equally usable directly.
//!
//! # Supported tables
//! - PAT, PMT, NIT, SDT, EIT (H/M/L), TDT, TOT — field-level parsing
//! - DSM-CC DII/DDB with compatibility descriptors — field-level parsing
//! - SDTT, BIT, CDT, AIT and the reserved future-use sections — header
//!   leaves plus raw payload
//!
//! # Usage
//! ```
//! use demuxfs_core::Demuxer;
//! use demuxfs_core::fs::fsutils;
//!
//! let mut demuxer = Demuxer::new();
//! # let ts_chunk: &[u8] = &[];
//! demuxer.feed(ts_chunk);
//!
//! if let Some(current) = fsutils::resolve(&demuxer.root(), "/PAT/Current") {
//!     for name in current.child_names() {
//!         println!("{name}");
//!     }
//! }
//! ```
//!
//! # Concurrency
//! A single ingestion thread drives [`Demuxer::feed`]; any number of
//! threads may traverse the tree and the dispatch tables concurrently
//! through [`DemuxContext`]. New table versions are built detached and
//! spliced in whole, and superseded subtrees stay alive until the last
//! reader drops its handle.

pub mod byteops;
pub mod demux;
pub mod descriptors;
pub mod dispatch;
pub mod error;
pub mod fs;
pub mod packet;
pub mod pes;
pub mod psi;
pub mod section;
pub mod tables;

#[cfg(test)]
pub(crate) mod testutil;

pub use demux::Demuxer;
pub use dispatch::{DemuxContext, DemuxStats, DemuxStatsSnapshot};
pub use error::{DemuxError, FsError};
pub use fs::{Dentry, DentryKind, XATTR_HEX};
pub use packet::{TsHeader, TsPacket, SYNC_BYTE, TS_PACKET_SIZE, TS_TIMESTAMPED_PACKET_SIZE};
pub use psi::{PsiHeader, PsiSection};
pub use section::{SectionAssembler, TS_MAX_SECTION_LENGTH};
