//! Byte-stream decoder for the sensor packet link.
//!
//! The serial reader appends whatever it received to the framer; the framer
//! yields every complete, non-duplicate packet it can parse and keeps the
//! rest buffered. Corrupt data never surfaces as an error — it is discarded
//! and counted, and the scanner resynchronizes on the next header pair.

use crate::protocol::{find_sync, SensorPacket};

/// Running counters kept by [`PacketFramer`] for diagnostics.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FramerStats {
    /// Packets accepted and yielded
    pub packets: u64,
    /// Packets dropped because their id was not above the watermark
    pub duplicates: u64,
    /// Garbage bytes discarded while hunting for the header
    pub discarded_bytes: u64,
    /// Times a false header match forced a one-byte rescan
    pub resyncs: u64,
}

/// Incremental packet decoder with duplicate suppression.
///
/// `packet_id` must strictly increase per stream: a packet whose id is at or
/// below the last accepted id is counted as a duplicate and dropped, never
/// buffered or reordered.
#[derive(Debug, Default)]
pub struct PacketFramer {
    buffer: Vec<u8>,
    last_id: Option<u32>,
    stats: FramerStats,
}

impl PacketFramer {
    /// Create an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes and collect every packet that became decodable.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SensorPacket> {
        self.buffer.extend_from_slice(bytes);

        let mut packets = Vec::new();
        loop {
            let Some(sync_pos) = find_sync(&self.buffer) else {
                // No header anywhere. Keep the final byte: it may be the
                // first half of a header split across two reads.
                if self.buffer.len() > 1 {
                    let garbage = self.buffer.len() - 1;
                    self.buffer.drain(..garbage);
                    self.stats.discarded_bytes += garbage as u64;
                }
                break;
            };

            if sync_pos > 0 {
                self.buffer.drain(..sync_pos);
                self.stats.discarded_bytes += sync_pos as u64;
            }

            if self.buffer.len() < SensorPacket::SIZE {
                break;
            }

            match SensorPacket::from_bytes(&self.buffer[..SensorPacket::SIZE]) {
                Ok(packet) => {
                    self.buffer.drain(..SensorPacket::SIZE);
                    if self.accept_id(packet.packet_id) {
                        self.stats.packets += 1;
                        packets.push(packet);
                    } else {
                        self.stats.duplicates += 1;
                    }
                }
                Err(_) => {
                    // A header match that fails to parse is a mis-detected
                    // sync inside payload data. Drop one byte and rescan
                    // instead of skipping a whole frame.
                    self.buffer.drain(..1);
                    self.stats.discarded_bytes += 1;
                    self.stats.resyncs += 1;
                }
            }
        }

        packets
    }

    fn accept_id(&mut self, id: u32) -> bool {
        match self.last_id {
            Some(last) if id <= last => false,
            _ => {
                self.last_id = Some(id);
                true
            }
        }
    }

    /// Diagnostic counters.
    #[must_use]
    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    /// Bytes currently buffered awaiting more data.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the buffer, the id watermark, and the counters.
    ///
    /// Call between acquisition sessions so a board reboot (ids restarting
    /// at zero) is not mistaken for a flood of duplicates.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_id = None;
        self.stats = FramerStats::default();
    }
}

// ============================================================================
// Tests
// ============================================================================
