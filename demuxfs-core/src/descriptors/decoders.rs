//! Built-in descriptor decoders.
//!
//! Each decoder receives the descriptor payload (tag and length stripped)
//! and appends leaves to the descriptor's directory. Decoders are small on
//! purpose; anything they cannot make sense of is reported as an error and
//! the registry falls back to a raw leaf.

use std::sync::Arc;

use crate::byteops::be16;
use crate::error::DemuxError;
use crate::fs::render::{create_number_leaf, create_string_leaf};
use crate::fs::Dentry;

fn need(what: &'static str, expected: usize, data: &[u8]) -> Result<(), DemuxError> {
    if data.len() < expected {
        return Err(DemuxError::Truncated {
            what,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Decode an SI character field.
///
/// ISDB strings are ARIB STD-B24 coded; full decoding needs the multi-byte
/// character set tables, so this keeps printable single-byte characters,
/// strips control codes and substitutes the rest.
pub fn decode_si_string(data: &[u8]) -> String {
    let start = if !data.is_empty() && data[0] < 0x20 { 1 } else { 0 };
    let slice = &data[start..];
    if let Ok(s) = std::str::from_utf8(slice) {
        if s.chars().all(|c| !c.is_control()) {
            return s.to_string();
        }
    }
    slice
        .iter()
        .filter(|&&b| b >= 0x20)
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}

/// Network name descriptor (0x40).
pub fn network_name(data: &[u8], parent: &Arc<Dentry>) -> Result<(), DemuxError> {
    create_string_leaf(parent, "network_name", &decode_si_string(data))?;
    Ok(())
}

/// Service list descriptor (0x41): `{service_id, service_type}` pairs.
pub fn service_list(data: &[u8], parent: &Arc<Dentry>) -> Result<(), DemuxError> {
    let dir = parent.add_child(Dentry::new_directory("Services"))?;
    let mut offset = 0;
    while offset + 3 <= data.len() {
        let service_id = be16(data[offset], data[offset + 1]);
        let service_type = data[offset + 2];
        create_number_leaf(&dir, &format!("0x{service_id:04x}"), service_type as u64, 1)?;
        offset += 3;
    }
    Ok(())
}

/// Service descriptor (0x48).
pub fn service(data: &[u8], parent: &Arc<Dentry>) -> Result<(), DemuxError> {
    need("service descriptor", 3, data)?;
    let service_type = data[0];
    let provider_len = data[1] as usize;
    need("service descriptor provider name", 2 + provider_len + 1, data)?;
    let provider = &data[2..2 + provider_len];
    let name_offset = 2 + provider_len;
    let name_len = data[name_offset] as usize;
    need(
        "service descriptor service name",
        name_offset + 1 + name_len,
        data,
    )?;
    let name = &data[name_offset + 1..name_offset + 1 + name_len];

    create_number_leaf(parent, "service_type", service_type as u64, 1)?;
    create_string_leaf(parent, "service_provider_name", &decode_si_string(provider))?;
    create_string_leaf(parent, "service_name", &decode_si_string(name))?;
    Ok(())
}

/// Stream identifier descriptor (0x52).
pub fn stream_identifier(data: &[u8], parent: &Arc<Dentry>) -> Result<(), DemuxError> {
    need("stream identifier descriptor", 1, data)?;
    create_number_leaf(parent, "component_tag", data[0] as u64, 1)?;
    Ok(())
}

/// TS information descriptor (0xCD, ISDB).
pub fn ts_information(data: &[u8], parent: &Arc<Dentry>) -> Result<(), DemuxError> {
    need("TS information descriptor", 2, data)?;
    let remote_control_key_id = data[0];
    let name_len = (data[1] >> 2) as usize;
    need("TS information descriptor name", 2 + name_len, data)?;
    create_number_leaf(parent, "remote_control_key_id", remote_control_key_id as u64, 1)?;
    create_string_leaf(
        parent,
        "ts_name",
        &decode_si_string(&data[2..2 + name_len]),
    )?;
    Ok(())
}

/// Terrestrial delivery system descriptor (0xFA, ISDB-T).
pub fn terrestrial_delivery(data: &[u8], parent: &Arc<Dentry>) -> Result<(), DemuxError> {
    need("terrestrial delivery descriptor", 2, data)?;
    let area_code = (be16(data[0], data[1]) >> 4) & 0x0FFF;
    let guard_interval = (data[1] >> 2) & 0x03;
    let transmission_mode = data[1] & 0x03;
    create_number_leaf(parent, "area_code", area_code as u64, 2)?;
    create_number_leaf(parent, "guard_interval", guard_interval as u64, 1)?;
    create_number_leaf(parent, "transmission_mode", transmission_mode as u64, 1)?;

    let dir = parent.add_child(Dentry::new_directory("Frequencies"))?;
    let mut offset = 2;
    let mut index = 1;
    while offset + 2 <= data.len() {
        // Frequency units of 1/7 MHz.
        let raw = be16(data[offset], data[offset + 1]) as u64;
        let hz = raw * 1_000_000 / 7;
        create_number_leaf(&dir, &format!("frequency_{index:02}"), hz, 4)?;
        offset += 2;
        index += 1;
    }
    Ok(())
}

/// Partial reception descriptor (0xFB, ISDB-T 1seg).
pub fn partial_reception(data: &[u8], parent: &Arc<Dentry>) -> Result<(), DemuxError> {
    let dir = parent.add_child(Dentry::new_directory("Services"))?;
    let mut offset = 0;
    let mut index = 1;
    while offset + 2 <= data.len() {
        let service_id = be16(data[offset], data[offset + 1]);
        create_number_leaf(&dir, &format!("service_id_{index:02}"), service_id as u64, 2)?;
        offset += 2;
        index += 1;
    }
    Ok(())
}
