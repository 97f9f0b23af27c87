//! Shared fixtures for unit tests: section and packet builders.

use crate::packet::{SYNC_BYTE, TS_PACKET_SIZE};
use crate::psi::crc32_mpeg2;

/// Build a long section (syntax indicator set) with a valid CRC.
pub(crate) fn build_section(
    table_id: u8,
    table_id_extension: u16,
    version: u8,
    section_number: u8,
    last_section_number: u8,
    payload: &[u8],
) -> Vec<u8> {
    let section_length = (5 + payload.len() + 4) as u16;
    let mut data = vec![
        table_id,
        0xB0 | ((section_length >> 8) as u8 & 0x0F),
        (section_length & 0xFF) as u8,
        (table_id_extension >> 8) as u8,
        (table_id_extension & 0xFF) as u8,
        0xC0 | ((version & 0x1F) << 1) | 0x01,
        section_number,
        last_section_number,
    ];
    data.extend_from_slice(payload);
    let crc = crc32_mpeg2(&data);
    data.extend_from_slice(&crc.to_be_bytes());
    data
}

/// Wrap a section into one 188-byte TS packet with a zero pointer_field.
///
/// The section must fit into a single packet; the remainder is stuffed
/// with 0xFF.
pub(crate) fn build_packet(pid: u16, continuity_counter: u8, section: &[u8]) -> Vec<u8> {
    assert!(section.len() <= TS_PACKET_SIZE - 5, "section does not fit");
    let mut packet = Vec::with_capacity(TS_PACKET_SIZE);
    packet.push(SYNC_BYTE);
    packet.push(0x40 | ((pid >> 8) as u8 & 0x1F));
    packet.push((pid & 0xFF) as u8);
    packet.push(0x10 | (continuity_counter & 0x0F));
    packet.push(0x00); // pointer_field
    packet.extend_from_slice(section);
    packet.resize(TS_PACKET_SIZE, 0xFF);
    packet
}

/// PAT payload: `{program_number, pid}` pairs in wire format.
pub(crate) fn pat_payload(programs: &[(u16, u16)]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(programs.len() * 4);
    for &(program_number, pid) in programs {
        payload.extend_from_slice(&program_number.to_be_bytes());
        payload.push(0xE0 | ((pid >> 8) as u8 & 0x1F));
        payload.push((pid & 0xFF) as u8);
    }
    payload
}
