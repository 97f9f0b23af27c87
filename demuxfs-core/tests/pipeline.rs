//! End-to-end pipeline tests: synthesised packets in, tree out.

use std::sync::Arc;

use demuxfs_core::fs::fsutils::{lookup, resolve};
use demuxfs_core::fs::Dentry;
use demuxfs_core::psi::crc32_mpeg2;
use demuxfs_core::{Demuxer, XATTR_HEX};

const TS_PACKET_SIZE: usize = 188;

/// Build a long section with a valid CRC.
fn build_section(
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

/// Wrap section bytes into TS packets for the PID, 0xFF-stuffed, with
/// continuity counters starting at `cc`.
fn packetize(pid: u16, cc: u8, section: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x00]; // pointer_field
    payload.extend_from_slice(section);

    let mut stream = Vec::new();
    let mut counter = cc;
    for (index, chunk) in payload.chunks(TS_PACKET_SIZE - 4).enumerate() {
        stream.push(0x47);
        stream.push(if index == 0 { 0x40 } else { 0x00 } | ((pid >> 8) as u8 & 0x1F));
        stream.push((pid & 0xFF) as u8);
        stream.push(0x10 | (counter & 0x0F));
        stream.extend_from_slice(chunk);
        let padding = TS_PACKET_SIZE - 4 - chunk.len();
        stream.extend(std::iter::repeat(0xFF).take(padding));
        counter = (counter + 1) & 0x0F;
    }
    stream
}

fn pat_payload(programs: &[(u16, u16)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for &(program_number, pid) in programs {
        payload.extend_from_slice(&program_number.to_be_bytes());
        payload.push(0xE0 | ((pid >> 8) as u8 & 0x1F));
        payload.push((pid & 0xFF) as u8);
    }
    payload
}

fn pat_section(version: u8, programs: &[(u16, u16)]) -> Vec<u8> {
    build_section(0x00, 0x7FE1, version, 0, 0, &pat_payload(programs))
}

#[test]
fn bad_sync_byte_changes_nothing() {
    let mut demuxer = Demuxer::new();
    let mut packet = packetize(0x0000, 0, &pat_section(0, &[(1, 0x0100)]));
    packet[0] = 0x48;
    demuxer.feed(&packet);

    assert_eq!(demuxer.root().child_count(), 0);
    assert_eq!(demuxer.stats().packets, 0);
}

#[test]
fn crc_gating_rejects_corrupted_section() {
    let mut demuxer = Demuxer::new();
    let mut section = pat_section(0, &[(1, 0x0100)]);
    section[8] ^= 0x01; // flip a bit in the program loop
    demuxer.feed(&packetize(0x0000, 0, &section));

    assert!(lookup(&demuxer.root(), "/PAT").is_none());
    assert_eq!(demuxer.stats().section_errors, 1);
    assert_eq!(demuxer.stats().tables_installed, 0);
}

#[test]
fn minimal_pat_scenario() {
    let mut demuxer = Demuxer::new();
    demuxer.feed(&packetize(0x0000, 0, &pat_section(0, &[(1, 0x0100)])));
    let root = demuxer.root();

    let link = lookup(&root, "/PAT/V00/Programs/0x0001").unwrap();
    assert_eq!(link.symlink_target().unwrap(), "../../../PMT/0x0100/Current");
    assert_eq!(
        lookup(&root, "/PAT/Current").unwrap().symlink_target().unwrap(),
        "V00"
    );
}

#[test]
fn version_idempotence() {
    let mut demuxer = Demuxer::new();
    let section = pat_section(0, &[(1, 0x0100)]);
    demuxer.feed(&packetize(0x0000, 0, &section));
    demuxer.feed(&packetize(0x0000, 1, &section));

    let pat_dir = lookup(&demuxer.root(), "/PAT").unwrap();
    assert_eq!(pat_dir.child_names(), vec!["Current", "V00"]);
    assert_eq!(demuxer.stats().tables_installed, 1);
}

#[test]
fn supersession_migrates_and_disposes() {
    let mut demuxer = Demuxer::new();
    demuxer.feed(&packetize(0x0000, 0, &pat_section(0, &[(1, 0x0100)])));
    let root = demuxer.root();

    // A reader bookmarks a node of V00 that v1 will not re-create.
    let v00 = lookup(&root, "/PAT/V00").unwrap();
    v00.add_child(Dentry::new_file("bookmark", b"kept".to_vec())).unwrap();
    let held = lookup(&root, "/PAT/V00/bookmark").unwrap();

    demuxer.feed(&packetize(0x0000, 1, &pat_section(1, &[(2, 0x0200)])));

    assert_eq!(
        lookup(&root, "/PAT/Current").unwrap().symlink_target().unwrap(),
        "V01"
    );
    let programs = lookup(&root, "/PAT/V01/Programs").unwrap();
    assert_eq!(programs.child_names(), vec!["0x0002"]);

    // The orphan is reachable at the same relative path under V01.
    assert_eq!(
        lookup(&root, "/PAT/V01/bookmark").unwrap().content(),
        b"kept".to_vec()
    );
    assert_eq!(held.parent().unwrap().name(), "V01");

    // V00 is detached; the held reference keeps its lineage alive until
    // dropped.
    assert!(lookup(&root, "/PAT/V00").is_none());
    drop(held);
    assert_eq!(Arc::strong_count(&v00), 1);
}

#[test]
fn numeric_leaves_round_trip() {
    let mut demuxer = Demuxer::new();
    demuxer.feed(&packetize(0x0000, 0, &pat_section(5, &[(1, 0x0100)])));
    let root = demuxer.root();

    let v05 = lookup(&root, "/PAT/V05").unwrap();
    for name in [
        "table_id",
        "section_length",
        "transport_stream_id",
        "version_number",
        "section_number",
        "last_section_number",
        "crc32",
    ] {
        let leaf = v05.get_child(name).unwrap();
        let decimal: u64 = String::from_utf8(leaf.content()).unwrap().parse().unwrap();
        let hex = String::from_utf8(leaf.xattr(XATTR_HEX).unwrap()).unwrap();
        let parsed = u64::from_str_radix(hex.trim_start_matches("0x"), 16).unwrap();
        assert_eq!(decimal, parsed, "leaf {name} renders inconsistently");
    }
    assert_eq!(
        lookup(&root, "/PAT/V05/version_number").unwrap().content(),
        b"5".to_vec()
    );
}

#[test]
fn dispatcher_grows_from_pat_and_pmt_resolves() {
    let mut demuxer = Demuxer::new();
    demuxer.feed(&packetize(0x0000, 0, &pat_section(0, &[(1, 0x0100)])));

    let ctx = demuxer.context();
    assert!(ctx.has_psi_parser(0x0100));

    // Feed the announced PMT; the PAT program symlink now resolves into it.
    let pmt_payload = [
        0xE1, 0x00, // PCR PID 0x0100
        0xF0, 0x00, // program_info_length 0
        0x1B, 0xE1, 0x01, 0xF0, 0x00, // H.264 on 0x0101
    ];
    let pmt = build_section(0x02, 0x0001, 0, 0, 0, &pmt_payload);
    demuxer.feed(&packetize(0x0100, 0, &pmt));

    let root = demuxer.root();
    let resolved = resolve(&root, "/PAT/Current/Programs/0x0001").unwrap();
    assert_eq!(resolved.name(), "V00");
    assert!(resolved.get_child("Streams").is_some());

    // The media PID announced by the PMT is registered for PES accounting.
    assert_eq!(ctx.pes_parser(0x0101).unwrap().stream_type, 0x1B);
}

#[test]
fn continuity_jump_drops_section_for_that_pid_only() {
    let mut demuxer = Demuxer::new();
    demuxer.feed(&packetize(0x0000, 0, &pat_section(0, &[(1, 0x0100), (2, 0x0200)])));

    // A PMT large enough to span two packets: descriptor-heavy ES loop.
    let mut pmt_payload = vec![0xE1, 0x00, 0xF0, 0x00];
    for stream in 0u8..40 {
        pmt_payload.extend_from_slice(&[
            0x1B,
            0xE1,
            stream,
            0xF0,
            0x00,
        ]);
    }
    let big_pmt = build_section(0x02, 0x0001, 0, 0, 0, &pmt_payload);
    let packets = packetize(0x0100, 0, &big_pmt);
    assert!(packets.len() >= 2 * TS_PACKET_SIZE);

    // Deliver the first packet, skip the second (continuity jump), then a
    // stray continuation with a wrong counter.
    let mut jumped = packets[..TS_PACKET_SIZE].to_vec();
    let mut tail = packets[TS_PACKET_SIZE..2 * TS_PACKET_SIZE].to_vec();
    tail[3] = 0x10 | 0x05; // counter 5 instead of 1
    jumped.extend_from_slice(&tail);
    demuxer.feed(&jumped);

    let root = demuxer.root();
    assert!(lookup(&root, "/PMT/0x0100").is_none());
    assert_eq!(demuxer.stats().discontinuities, 1);

    // Another PID is unaffected.
    let small_pmt = build_section(0x02, 0x0002, 0, 0, 0, &[0xE2, 0x00, 0xF0, 0x00]);
    demuxer.feed(&packetize(0x0200, 0, &small_pmt));
    assert!(lookup(&root, "/PMT/0x0200/V00").is_some());
}

#[test]
fn transport_error_changes_nothing() {
    let mut demuxer = Demuxer::new();
    let mut packet = packetize(0x0000, 0, &pat_section(0, &[(1, 0x0100)]));
    packet[1] |= 0x80;
    demuxer.feed(&packet);

    assert_eq!(demuxer.root().child_count(), 0);
    assert!(!demuxer.context().has_psi_parser(0x0100));
    assert_eq!(demuxer.stats().transport_errors, 1);
}

#[test]
fn dsmcc_compatibility_descriptor_scenario() {
    let mut demuxer = Demuxer::new();

    // PAT announces the program, the PMT announces a DSM-CC ES PID.
    demuxer.feed(&packetize(0x0000, 0, &pat_section(0, &[(1, 0x0100)])));
    let pmt_payload = [
        0xE1, 0x00, 0xF0, 0x00, // PCR, no program info
        0x0B, 0xEA, 0xBC, 0xF0, 0x00, // DSM-CC type B on PID 0x0ABC
    ];
    demuxer.feed(&packetize(
        0x0100,
        0,
        &build_section(0x02, 0x0001, 0, 0, 0, &pmt_payload),
    ));
    assert!(demuxer.context().has_psi_parser(0x0ABC));

    // DII with descriptor_count=2, sub_descriptor_count=(1, 0).
    let mut dii = vec![
        0x11, 0x03, // protocol, type
        0x10, 0x02, // message_id DII
        0x00, 0x00, 0x00, 0x01, // transaction_id
        0xFF, 0x00, // reserved, adaptation_length
        0x00, 0x00, // message_length
    ];
    dii.extend_from_slice(&[0x00, 0x00, 0x00, 0x07]); // download_id
    dii.extend_from_slice(&[0x10, 0x00]); // block_size
    dii.extend_from_slice(&[0x00, 0x00]); // window_size, ack_period
    dii.extend_from_slice(&[0x00; 8]); // download window + scenario
    // compatibility descriptor
    let compat: Vec<u8> = {
        let mut body = vec![0x00, 0x02]; // descriptor_count
        body.extend_from_slice(&[0x01, 0x0D, 0x01, 0xAA, 0xBB, 0xCC]);
        body.extend_from_slice(&[0x00, 0x01, 0x00, 0x02, 0x01]); // model, version, 1 sub
        body.extend_from_slice(&[0x05, 0x02, 0xDE, 0xAD]);
        body.extend_from_slice(&[0x02, 0x09, 0x00, 0x00, 0x00, 0x00]);
        body.extend_from_slice(&[0x00, 0x03, 0x00, 0x04, 0x00]); // model, version, 0 subs
        let mut out = (body.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(&body);
        out
    };
    dii.extend_from_slice(&compat);
    dii.extend_from_slice(&[0x00, 0x00]); // numberOfModules = 0
    demuxer.feed(&packetize(0x0ABC, 0, &build_section(0x3B, 0x0001, 0, 0, 0, &dii)));

    let root = demuxer.root();
    let compat_dir = lookup(&root, "/DSM-CC/0x0abc/V00/CompatibilityDescriptor").unwrap();
    let first = compat_dir.get_child("descriptor_01").unwrap();
    let second = compat_dir.get_child("descriptor_02").unwrap();
    assert!(first.get_child("sub_descriptor_01").is_some());
    assert!(second.get_child("sub_descriptor_01").is_none());
}

#[test]
fn readers_keep_superseded_subtrees_alive() {
    let mut demuxer = Demuxer::new();
    demuxer.feed(&packetize(0x0000, 0, &pat_section(0, &[(1, 0x0100)])));

    let root = demuxer.root();
    let reader_handle = lookup(&root, "/PAT/V00").unwrap();

    demuxer.feed(&packetize(0x0000, 1, &pat_section(1, &[(1, 0x0100)])));
    assert!(lookup(&root, "/PAT/V00").is_none());

    // The detached version still serves reads.
    assert_eq!(
        reader_handle.get_child("version_number").unwrap().content(),
        b"0".to_vec()
    );

    // Once the reader drops its handle, nothing keeps the subtree alive.
    let weak = Arc::downgrade(&reader_handle);
    drop(reader_handle);
    assert!(weak.upgrade().is_none());
}

#[test]
fn section_split_across_packets_reassembles() {
    let mut demuxer = Demuxer::new();
    demuxer.feed(&packetize(0x0000, 0, &pat_section(0, &[(1, 0x0100)])));

    let mut pmt_payload = vec![0xE1, 0x00, 0xF0, 0x00];
    for stream in 0u8..40 {
        pmt_payload.extend_from_slice(&[0x1B, 0xE1, stream, 0xF0, 0x00]);
    }
    let big_pmt = build_section(0x02, 0x0001, 0, 0, 0, &pmt_payload);
    demuxer.feed(&packetize(0x0100, 0, &big_pmt));

    let streams = lookup(&demuxer.root(), "/PMT/0x0100/V00/Streams").unwrap();
    assert_eq!(streams.child_count(), 40);
}
