//! PSI section reassembly.
//!
//! A section can span several TS packets and a single packet can carry the
//! tail of one section plus the start of the next, so each PID keeps one
//! assembler that accumulates payload bytes and emits complete sections in
//! wire order.

use log::warn;

/// Maximum value of `section_length` allowed by the standard.
pub const TS_MAX_SECTION_LENGTH: u16 = 0x03FD;

/// Per-PID section assembler.
///
/// Feed it the payload of every packet for the PID via [`push`]; complete
/// sections (header plus `section_length` bytes) come back in order. State
/// survives across packets until [`reset`] or a malformed length.
///
/// [`push`]: SectionAssembler::push
/// [`reset`]: SectionAssembler::reset
#[derive(Debug, Default)]
pub struct SectionAssembler {
    buffer: Vec<u8>,
    /// Set once a payload_unit_start has been seen; continuation bytes that
    /// arrive before the first section start are unusable.
    synced: bool,
}

impl SectionAssembler {
    /// Create a new assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partially assembled section.
    ///
    /// Called on continuity errors so that a section with a missing middle
    /// packet is never handed to a parser.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.synced = false;
    }

    /// Check whether a section is partially assembled.
    pub fn in_progress(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Add the payload of one TS packet and collect completed sections.
    pub fn push(&mut self, payload: &[u8], payload_unit_start: bool, pid: u16) -> Vec<Vec<u8>> {
        let mut complete = Vec::new();

        if payload_unit_start {
            if payload.is_empty() {
                return complete;
            }
            let pointer = payload[0] as usize;
            if 1 + pointer > payload.len() {
                warn!("pid {pid:#06x}: pointer_field {pointer} exceeds payload, resetting");
                self.reset();
                return complete;
            }
            // Bytes before the pointer target finish a section in progress.
            if self.synced && !self.buffer.is_empty() {
                self.buffer.extend_from_slice(&payload[1..1 + pointer]);
                self.drain_complete(&mut complete, pid);
                if !self.buffer.is_empty() {
                    warn!(
                        "pid {pid:#06x}: discarding {} bytes of unfinished section",
                        self.buffer.len()
                    );
                }
            }
            self.buffer.clear();
            self.synced = true;
            self.buffer.extend_from_slice(&payload[1 + pointer..]);
            self.drain_complete(&mut complete, pid);
        } else if self.synced && !self.buffer.is_empty() {
            self.buffer.extend_from_slice(payload);
            self.drain_complete(&mut complete, pid);
        }

        complete
    }

    /// Pop every complete section off the front of the buffer.
    fn drain_complete(&mut self, out: &mut Vec<Vec<u8>>, pid: u16) {
        loop {
            if self.buffer.is_empty() {
                return;
            }
            // 0xFF at a section boundary is stuffing up to the packet end.
            if self.buffer[0] == 0xFF {
                self.buffer.clear();
                return;
            }
            if self.buffer.len() < 3 {
                return;
            }
            let section_length = ((self.buffer[1] as u16 & 0x0F) << 8) | self.buffer[2] as u16;
            if section_length > TS_MAX_SECTION_LENGTH {
                warn!(
                    "pid {pid:#06x}: section_length {section_length:#06x} out of range, resetting"
                );
                self.reset();
                return;
            }
            let total = 3 + section_length as usize;
            if self.buffer.len() < total {
                return;
            }
            out.push(self.buffer[..total].to_vec());
            self.buffer.drain(..total);
        }
    }
}
