//! Elementary stream accounting.
//!
//! ES payloads are not decoded (that is the player's job, not the
//! demultiplexer's); the PIDs announced by the PMT are tracked in
//! `pes_tables` with per-stream packet and byte counters so the pipeline
//! can report what it routed.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::trace;

use crate::dispatch::{DemuxContext, PesStream};

/// Account one packet's payload for an ES PID previously registered by the
/// PMT parser.
pub fn feed(ctx: &DemuxContext, pid: u16, payload_len: usize) {
    let Some(entry) = ctx.pes_parser(pid) else {
        return;
    };

    let stream = {
        let tables = ctx.pes_tables.read();
        tables.get(&pid).cloned()
    };
    let stream = match stream {
        Some(stream) => stream,
        None => {
            let stream = Arc::new(PesStream {
                stream_type: entry.stream_type,
                ..PesStream::default()
            });
            ctx.pes_tables.write().insert(pid, Arc::clone(&stream));
            stream
        }
    };

    stream.packets.fetch_add(1, Ordering::Relaxed);
    stream.bytes.fetch_add(payload_len as u64, Ordering::Relaxed);
    trace!("pes {pid:#06x}: +{payload_len} bytes");
}
