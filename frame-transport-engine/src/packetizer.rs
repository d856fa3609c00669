//! Frame packetization
//!
//! Splits one frame into network-sized Data packets. Large video key
//! frames routinely span hundreds of fragments; the split copies each
//! slice once into its wire buffer and allocates nothing beyond the
//! per-packet header overhead.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{TransportError, TransportResult};
use crate::packet::{Packet, PacketHeader, PacketKind, StreamType};
use bytes::Bytes;

/// Splits frames into fragments no larger than the configured segment size
pub struct Packetizer {
    max_segment_size: usize,
}

impl Packetizer {
    /// Create a packetizer for the given maximum segment size
    pub fn new(max_segment_size: usize) -> Self {
        Packetizer { max_segment_size }
    }

    /// Number of fragments a payload of `len` bytes will produce
    pub fn fragment_count(&self, len: usize) -> usize {
        (len + self.max_segment_size - 1) / self.max_segment_size
    }

    /// Split a frame payload into Data packets in fragment-index order
    ///
    /// Single-fragment frames still carry `fragment_count = 1` so the
    /// receive side never special-cases them.
    pub fn packetize(
        &self,
        stream: StreamType,
        frame_id: u32,
        payload: &[u8],
    ) -> TransportResult<Vec<Packet>> {
        if payload.is_empty() {
            return Err(TransportError::InvalidFrame(
                "zero-length frame".to_string(),
            ));
        }

        let num_fragments = self.fragment_count(payload.len());
        if num_fragments > u16::MAX as usize {
            return Err(TransportError::InvalidFrame(format!(
                "frame needs {} fragments, limit is {}",
                num_fragments,
                u16::MAX
            )));
        }

        let mut packets = Vec::with_capacity(num_fragments);
        let mut offset = 0;

        for fragment_index in 0..num_fragments {
            let remaining = payload.len() - offset;
            let fragment_size = remaining.min(self.max_segment_size);

            packets.push(Packet {
                header: PacketHeader {
                    kind: PacketKind::Data,
                    stream,
                    frame_id,
                    fragment_index: fragment_index as u16,
                    fragment_count: num_fragments as u16,
                },
                payload: Bytes::copy_from_slice(&payload[offset..offset + fragment_size]),
            });

            offset += fragment_size;
        }

        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_count_is_ceiling() {
        let packetizer = Packetizer::new(1200);
        assert_eq!(packetizer.fragment_count(1), 1);
        assert_eq!(packetizer.fragment_count(1200), 1);
        assert_eq!(packetizer.fragment_count(1201), 2);
        assert_eq!(packetizer.fragment_count(5000), 5);
    }

    #[test]
    fn test_five_thousand_bytes_make_five_fragments() {
        let packetizer = Packetizer::new(1200);
        let payload = vec![0xAB; 5000];

        let packets = packetizer
            .packetize(StreamType::Video, 7, &payload)
            .unwrap();

        assert_eq!(packets.len(), 5);
        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet.header.fragment_index, i as u16);
            assert_eq!(packet.header.fragment_count, 5);
            assert_eq!(packet.header.frame_id, 7);
        }
        assert_eq!(packets[0].payload.len(), 1200);
        assert_eq!(packets[4].payload.len(), 200);
    }

    #[test]
    fn test_single_fragment_frame_still_counts_one() {
        let packetizer = Packetizer::new(1200);
        let packets = packetizer
            .packetize(StreamType::Audio, 1, &[1, 2, 3])
            .unwrap();

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].header.fragment_index, 0);
        assert_eq!(packets[0].header.fragment_count, 1);
    }

    #[test]
    fn test_fragments_concatenate_to_original() {
        let packetizer = Packetizer::new(256);
        let payload: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();

        let packets = packetizer
            .packetize(StreamType::Video, 3, &payload)
            .unwrap();

        let mut rebuilt = Vec::new();
        for packet in &packets {
            rebuilt.extend_from_slice(&packet.payload);
        }
        assert_eq!(rebuilt, payload);
    }

    #[test]
    fn test_rejects_empty_frame() {
        let packetizer = Packetizer::new(1200);
        let result = packetizer.packetize(StreamType::Audio, 1, &[]);
        assert!(matches!(result, Err(TransportError::InvalidFrame(_))));
    }

    #[test]
    fn test_rejects_fragment_count_overflow() {
        let packetizer = Packetizer::new(1);
        let payload = vec![0u8; u16::MAX as usize + 1];
        let result = packetizer.packetize(StreamType::Video, 1, &payload);
        assert!(matches!(result, Err(TransportError::InvalidFrame(_))));
    }
}
