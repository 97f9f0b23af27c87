//! PSI section header parsing and CRC-32 validation.
//!
//! Every long section (section_syntax_indicator set) carries the same
//! 8-byte header followed by table payload and a trailing CRC-32. Short
//! sections (TDT and friends) only carry the 3-byte prefix and no CRC.

use crc::{Crc, CRC_32_MPEG_2};

use crate::byteops::be16;
use crate::error::DemuxError;

const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// CRC-32/MPEG-2: polynomial 0x04C11DB7, initial 0xFFFFFFFF, no reflection,
/// no final XOR.
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    CRC_MPEG.checksum(data)
}

/// Section header common to all PSI/SI tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsiHeader {
    /// Table ID.
    pub table_id: u8,
    /// Section syntax indicator.
    pub section_syntax_indicator: bool,
    /// Private indicator.
    pub private_indicator: bool,
    /// Section length (12 bits).
    pub section_length: u16,
    /// Table ID extension: transport_stream_id, program_number or
    /// network_id depending on the table. Zero for short sections.
    pub table_id_extension: u16,
    /// Version number (5 bits).
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Section number.
    pub section_number: u8,
    /// Last section number.
    pub last_section_number: u8,
    /// Stored CRC-32. Zero for short sections.
    pub crc32: u32,
}

/// A validated PSI section.
#[derive(Debug, Clone)]
pub struct PsiSection<'a> {
    /// Parsed common header.
    pub header: PsiHeader,
    /// Payload bytes between the common header and the CRC.
    pub payload: &'a [u8],
}

impl<'a> PsiSection<'a> {
    /// Parse and validate one complete section.
    ///
    /// `data` must hold exactly the section as produced by the assembler:
    /// 3-byte prefix plus `section_length` bytes. The CRC is verified over
    /// the whole section whenever the syntax indicator is set; a mismatch
    /// rejects the section.
    pub fn parse(data: &'a [u8]) -> Result<Self, DemuxError> {
        if data.len() < 3 {
            return Err(DemuxError::IncompleteSection {
                expected: 3,
                actual: data.len(),
            });
        }

        let table_id = data[0];
        let section_syntax_indicator = data[1] & 0x80 != 0;
        let private_indicator = data[1] & 0x40 != 0;
        let section_length = ((data[1] as u16 & 0x0F) << 8) | data[2] as u16;
        let total = 3 + section_length as usize;
        if data.len() < total {
            return Err(DemuxError::IncompleteSection {
                expected: total,
                actual: data.len(),
            });
        }

        if !section_syntax_indicator {
            return Ok(PsiSection {
                header: PsiHeader {
                    table_id,
                    section_syntax_indicator,
                    private_indicator,
                    section_length,
                    table_id_extension: 0,
                    version_number: 0,
                    current_next_indicator: true,
                    section_number: 0,
                    last_section_number: 0,
                    crc32: 0,
                },
                payload: &data[3..total],
            });
        }

        // Long section: 5 header bytes past the prefix plus 4 bytes of CRC.
        if section_length < 9 {
            return Err(DemuxError::IncompleteSection {
                expected: 12,
                actual: total,
            });
        }

        let stored = u32::from_be_bytes([
            data[total - 4],
            data[total - 3],
            data[total - 2],
            data[total - 1],
        ]);
        let computed = crc32_mpeg2(&data[..total - 4]);
        if computed != stored {
            return Err(DemuxError::CrcMismatch { computed, stored });
        }

        let header = PsiHeader {
            table_id,
            section_syntax_indicator,
            private_indicator,
            section_length,
            table_id_extension: be16(data[3], data[4]),
            version_number: (data[5] >> 1) & 0x1F,
            current_next_indicator: data[5] & 0x01 != 0,
            section_number: data[6],
            last_section_number: data[7],
            crc32: stored,
        };

        Ok(PsiSection {
            header,
            payload: &data[8..total - 4],
        })
    }
}
