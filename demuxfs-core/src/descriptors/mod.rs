//! Descriptor plug-in registry.
//!
//! Tables carry loops of tagged descriptors. Each known tag maps to a small
//! decoder that appends leaves under the descriptor's directory; unknown
//! tags fall back to a raw-bytes leaf. The registry is data driven so that
//! adding a decoder is purely additive and the tables never branch on tags
//! themselves.

mod decoders;

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use once_cell::sync::Lazy;

use crate::error::{DemuxError, FsError};
use crate::fs::render::{create_bin_leaf, create_number_leaf};
use crate::fs::Dentry;

pub use decoders::decode_si_string;

/// Signature of a descriptor decoder: payload bytes (tag and length already
/// stripped) plus the directory to populate.
pub type DescriptorDecodeFn = fn(&[u8], &Arc<Dentry>) -> Result<(), DemuxError>;

/// Mapping from 8-bit descriptor tag to decoder.
#[derive(Clone, Default)]
pub struct DescriptorRegistry {
    by_tag: HashMap<u8, DescriptorDecodeFn>,
}

impl DescriptorRegistry {
    /// Registry with no decoders; every descriptor renders as raw bytes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in decoders.
    pub fn builtin() -> Self {
        static BUILTIN: Lazy<DescriptorRegistry> = Lazy::new(|| {
            let mut registry = DescriptorRegistry::empty();
            registry.register(tag::NETWORK_NAME, decoders::network_name);
            registry.register(tag::SERVICE_LIST, decoders::service_list);
            registry.register(tag::SERVICE, decoders::service);
            registry.register(tag::STREAM_IDENTIFIER, decoders::stream_identifier);
            registry.register(tag::TS_INFORMATION, decoders::ts_information);
            registry.register(tag::TERRESTRIAL_DELIVERY, decoders::terrestrial_delivery);
            registry.register(tag::PARTIAL_RECEPTION, decoders::partial_reception);
            registry
        });
        BUILTIN.clone()
    }

    /// Add or replace the decoder for a tag.
    pub fn register(&mut self, tag: u8, decoder: DescriptorDecodeFn) {
        self.by_tag.insert(tag, decoder);
    }

    /// Check whether a tag has a dedicated decoder.
    pub fn knows(&self, tag: u8) -> bool {
        self.by_tag.contains_key(&tag)
    }

    /// Decode one descriptor into `parent`.
    ///
    /// Unknown tags and decoder failures degrade to a raw `data` leaf so a
    /// malformed descriptor never suppresses the rest of its table.
    pub fn decode(&self, tag: u8, data: &[u8], parent: &Arc<Dentry>) -> Result<(), FsError> {
        match self.by_tag.get(&tag) {
            Some(decoder) => {
                if let Err(e) = decoder(data, parent) {
                    warn!("descriptor {tag:#04x} decode failed: {e}");
                    if !parent.has_child("data") {
                        create_bin_leaf(parent, "data", data)?;
                    }
                }
                Ok(())
            }
            None => {
                create_bin_leaf(parent, "data", data)?;
                Ok(())
            }
        }
    }
}

/// Descriptor tags with built-in decoders.
pub mod tag {
    /// Network name descriptor.
    pub const NETWORK_NAME: u8 = 0x40;
    /// Service list descriptor.
    pub const SERVICE_LIST: u8 = 0x41;
    /// Service descriptor.
    pub const SERVICE: u8 = 0x48;
    /// Stream identifier descriptor.
    pub const STREAM_IDENTIFIER: u8 = 0x52;
    /// TS information descriptor (ISDB).
    pub const TS_INFORMATION: u8 = 0xCD;
    /// Terrestrial delivery system descriptor (ISDB-T).
    pub const TERRESTRIAL_DELIVERY: u8 = 0xFA;
    /// Partial reception descriptor (ISDB-T 1seg).
    pub const PARTIAL_RECEPTION: u8 = 0xFB;
}

/// Split a descriptor loop into `(tag, payload)` pairs.
///
/// A length that overruns the loop ends the iteration; bytes before the
/// overrun are still returned.
pub fn parse_descriptor_loop(data: &[u8]) -> Vec<(u8, &[u8])> {
    let mut descriptors = Vec::new();
    let mut offset = 0;
    while offset + 2 <= data.len() {
        let tag = data[offset];
        let length = data[offset + 1] as usize;
        offset += 2;
        if offset + length > data.len() {
            break;
        }
        descriptors.push((tag, &data[offset..offset + length]));
        offset += length;
    }
    descriptors
}

/// Render a whole descriptor loop as `descriptor_01..NN/` directories under
/// `parent`, each holding `descriptor_tag`, `descriptor_length` and the
/// decoder's leaves.
pub fn create_descriptor_dirs(
    registry: &DescriptorRegistry,
    parent: &Arc<Dentry>,
    loop_data: &[u8],
) -> Result<(), FsError> {
    for (index, (tag, data)) in parse_descriptor_loop(loop_data).iter().enumerate() {
        let dir = parent.add_child(Dentry::new_directory(format!(
            "descriptor_{:02}",
            index + 1
        )))?;
        create_number_leaf(&dir, "descriptor_tag", *tag as u64, 1)?;
        create_number_leaf(&dir, "descriptor_length", data.len() as u64, 1)?;
        registry.decode(*tag, data, &dir)?;
    }
    Ok(())
}
