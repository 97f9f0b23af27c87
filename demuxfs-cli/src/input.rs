//! Input sources: TS files (plain or ISDB-timestamped) and UDP multicast.

use std::fs::File;
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::Context;
use demuxfs_core::{Demuxer, SYNC_BYTE, TS_PACKET_SIZE, TS_TIMESTAMPED_PACKET_SIZE};
use log::{debug, info};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// On-disk packet framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFormat {
    /// Plain 188-byte packets.
    Standard,
    /// 192-byte packets: a 4-byte ISDB timestamp per packet, stripped
    /// before the engine sees the bytes.
    Timestamped,
}

/// Guess the packet framing from the head of the stream by looking for
/// sync bytes at a constant spacing.
pub fn detect_format(data: &[u8]) -> PacketFormat {
    let limit = data.len().min(TS_TIMESTAMPED_PACKET_SIZE * 2);
    for start in 0..limit {
        if data[start] != SYNC_BYTE {
            continue;
        }
        if has_spacing(data, start, TS_PACKET_SIZE) {
            return PacketFormat::Standard;
        }
        if has_spacing(data, start, TS_TIMESTAMPED_PACKET_SIZE) {
            return PacketFormat::Timestamped;
        }
    }
    PacketFormat::Standard
}

fn has_spacing(data: &[u8], start: usize, spacing: usize) -> bool {
    (1..=2).all(|k| {
        data.get(start + k * spacing)
            .is_some_and(|&byte| byte == SYNC_BYTE)
    })
}

/// Feeds the demultiplexer from a byte source, stripping per-packet
/// timestamps when the stream uses the 192-byte framing.
pub struct StreamFeeder {
    format: Option<PacketFormat>,
    pending: Vec<u8>,
}

impl StreamFeeder {
    pub fn new() -> Self {
        StreamFeeder {
            format: None,
            pending: Vec::new(),
        }
    }

    /// Push a chunk of input into the demultiplexer.
    pub fn feed(&mut self, data: &[u8], demuxer: &mut Demuxer) {
        self.pending.extend_from_slice(data);
        let format = match self.format {
            Some(format) => format,
            None => {
                if self.pending.len() < TS_TIMESTAMPED_PACKET_SIZE * 3 {
                    return;
                }
                let format = detect_format(&self.pending);
                debug!("detected packet format: {format:?}");
                self.format = Some(format);
                format
            }
        };

        match format {
            PacketFormat::Standard => {
                let buffered = std::mem::take(&mut self.pending);
                demuxer.feed(&buffered);
            }
            PacketFormat::Timestamped => self.drain_timestamped(demuxer),
        }
    }

    /// Flush buffered bytes at end of stream.
    ///
    /// Needed for inputs shorter than the detection window: the format is
    /// decided on whatever arrived and the buffer drains through the
    /// engine's own resynchronisation.
    pub fn finish(&mut self, demuxer: &mut Demuxer) {
        if self.format.is_none() {
            let format = detect_format(&self.pending);
            debug!("detected packet format at end of stream: {format:?}");
            self.format = Some(format);
        }
        match self.format {
            Some(PacketFormat::Timestamped) => self.drain_timestamped(demuxer),
            _ => {
                let buffered = std::mem::take(&mut self.pending);
                demuxer.feed(&buffered);
            }
        }
    }

    /// Align to the 192-byte grid and feed the 188 packet bytes of every
    /// group, dropping the 4 timestamp bytes.
    fn drain_timestamped(&mut self, demuxer: &mut Demuxer) {
        const GROUP: usize = TS_TIMESTAMPED_PACKET_SIZE;
        if self.pending.len() < 3 * GROUP {
            return;
        }

        // Drop leading bytes until a sync byte repeats at 192-byte spacing.
        let search_end = self.pending.len() - 2 * GROUP;
        let start = (0..search_end).find(|&i| {
            self.pending[i] == SYNC_BYTE && has_spacing(&self.pending, i, GROUP)
        });
        let Some(start) = start else {
            self.pending.drain(..search_end);
            return;
        };
        self.pending.drain(..start);

        let mut offset = 0;
        while self.pending.len() - offset >= TS_PACKET_SIZE {
            demuxer.feed(&self.pending[offset..offset + TS_PACKET_SIZE]);
            offset += GROUP;
        }
        let consumed = offset.min(self.pending.len());
        self.pending.drain(..consumed);
    }
}

/// Read a TS file (or stdin for `-`) to exhaustion.
pub fn feed_file(path: &Path, demuxer: &mut Demuxer) -> anyhow::Result<()> {
    let mut reader: Box<dyn Read> = if path.as_os_str() == "-" {
        Box::new(io::stdin().lock())
    } else {
        Box::new(File::open(path).with_context(|| format!("cannot open {}", path.display()))?)
    };

    let mut feeder = StreamFeeder::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).context("read error")?;
        if n == 0 {
            break;
        }
        total += n as u64;
        feeder.feed(&buf[..n], demuxer);
    }
    feeder.finish(demuxer);
    info!("ingested {total} bytes from {}", path.display());
    Ok(())
}

/// Bind a unicast or multicast UDP socket for the given address.
fn create_udp_socket(addr: SocketAddr) -> anyhow::Result<Socket> {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => anyhow::bail!("only IPv4 is supported"),
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    if ip.is_multicast() {
        socket.join_multicast_v4(&ip, &Ipv4Addr::UNSPECIFIED)?;
    }
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Receive TS datagrams until interrupted.
pub async fn run_udp(addr: SocketAddr, demuxer: &mut Demuxer) -> anyhow::Result<()> {
    let socket = create_udp_socket(addr)?;
    let sock = UdpSocket::from_std(socket.into())?;
    info!("listening on udp://{addr}");

    let mut buf = [0u8; 2048];
    loop {
        tokio::select! {
            result = sock.recv(&mut buf) => {
                let n = result.context("udp receive error")?;
                if n > 0 {
                    demuxer.feed(&buf[..n]);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, draining");
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet_with_sync(fill: u8) -> Vec<u8> {
        let mut packet = vec![fill; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet
    }

    #[test]
    fn test_detect_standard() {
        let mut stream = Vec::new();
        for _ in 0..3 {
            stream.extend_from_slice(&packet_with_sync(0x00));
        }
        assert_eq!(detect_format(&stream), PacketFormat::Standard);
    }

    #[test]
    fn test_detect_timestamped() {
        let mut stream = Vec::new();
        for _ in 0..3 {
            stream.extend_from_slice(&[0x01, 0x02, 0x03, 0x04]);
            stream.extend_from_slice(&packet_with_sync(0x00));
        }
        assert_eq!(detect_format(&stream), PacketFormat::Timestamped);
    }

    #[test]
    fn test_timestamped_feeder_strips_prefixes() {
        // Three timestamped null packets; the demuxer should see exactly
        // three 188-byte packets.
        let mut stream = Vec::new();
        for _ in 0..3 {
            stream.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
            let mut packet = packet_with_sync(0xFF);
            packet[1] = 0x1F;
            packet[2] = 0xFF; // null PID
            packet[3] = 0x10;
            stream.extend_from_slice(&packet);
        }

        let mut demuxer = Demuxer::new();
        let mut feeder = StreamFeeder::new();
        feeder.feed(&stream, &mut demuxer);
        assert_eq!(demuxer.stats().packets, 3);
        assert_eq!(demuxer.stats().sync_losses, 0);
    }
}
