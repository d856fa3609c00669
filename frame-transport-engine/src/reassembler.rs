//! Inbound frame reassembly
//!
//! Rebuilds complete frames from Data packets arriving in any order.
//! Live-media policy: recency beats completeness. Once a frame is
//! delivered, anything older is dead: later fragments for older ids are
//! dropped and incomplete older entries are evicted, so persistent loss
//! can never pin memory.
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
use crate::packet::{Packet, PacketKind};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::trace;

/// One in-progress inbound frame
struct ReassemblyEntry {
    fragment_count: u16,
    fragments: Vec<Option<Bytes>>,
    received: u16,
    started_at: Instant,
}

impl ReassemblyEntry {
    fn new(fragment_count: u16) -> Self {
        ReassemblyEntry {
            fragment_count,
            fragments: vec![None; fragment_count as usize],
            received: 0,
            started_at: Instant::now(),
        }
    }

    /// Store a fragment; returns true when the frame is complete
    fn add_fragment(&mut self, index: u16, payload: Bytes) -> bool {
        let slot = &mut self.fragments[index as usize];
        if slot.is_none() {
            *slot = Some(payload);
            self.received += 1;
        }
        self.received == self.fragment_count
    }

    /// Concatenate the fragments in index order
    fn assemble(self) -> Bytes {
        let total: usize = self
            .fragments
            .iter()
            .map(|f| f.as_ref().map(Bytes::len).unwrap_or(0))
            .sum();
        let mut frame = BytesMut::with_capacity(total);
        for fragment in self.fragments.into_iter().flatten() {
            frame.put_slice(&fragment);
        }
        frame.freeze()
    }
}

/// Per-stream frame reassembler with a bounded in-progress table
pub struct Reassembler {
    entries: HashMap<u32, ReassemblyEntry>,
    last_delivered: Option<u32>,
    max_entries: usize,
    entry_timeout: Duration,
    frames_evicted: u64,
}

impl Reassembler {
    /// Create a reassembler bounded to `max_entries` in-progress frames
    pub fn new(max_entries: usize, entry_timeout: Duration) -> Self {
        Reassembler {
            entries: HashMap::new(),
            last_delivered: None,
            max_entries,
            entry_timeout,
            frames_evicted: 0,
        }
    }

    /// Feed one Data packet; returns the frame payload on completion
    ///
    /// Stale packets (frame id at or below the newest delivered frame)
    /// are dropped silently. Partial frames are never returned.
    pub fn accept(&mut self, packet: &Packet) -> TransportResult<Option<Bytes>> {
        let header = &packet.header;

        if header.kind != PacketKind::Data {
            return Err(TransportError::Reassembly(
                "non-data packet fed to reassembler".to_string(),
            ));
        }
        if header.fragment_count == 0 {
            return Err(TransportError::Reassembly(
                "fragment count of zero".to_string(),
            ));
        }
        if header.fragment_index >= header.fragment_count {
            return Err(TransportError::Reassembly(format!(
                "fragment index {} out of range for count {}",
                header.fragment_index, header.fragment_count
            )));
        }

        // Never resurrect a frame older than what was already delivered.
        if let Some(last) = self.last_delivered {
            if header.frame_id <= last {
                trace!(
                    frame_id = header.frame_id,
                    last_delivered = last,
                    "dropping stale fragment"
                );
                return Ok(None);
            }
        }

        if !self.entries.contains_key(&header.frame_id) {
            self.make_room(header.frame_id);
            if self.entries.len() >= self.max_entries {
                // Incoming frame is older than everything in the full
                // table; it loses.
                return Ok(None);
            }
            self.entries
                .insert(header.frame_id, ReassemblyEntry::new(header.fragment_count));
        }

        let entry = match self.entries.get_mut(&header.frame_id) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let expected = entry.fragment_count;
        if expected != header.fragment_count {
            self.entries.remove(&header.frame_id);
            return Err(TransportError::Reassembly(format!(
                "fragment count changed mid-frame: {} then {}",
                expected, header.fragment_count
            )));
        }

        if !entry.add_fragment(header.fragment_index, packet.payload.clone()) {
            return Ok(None);
        }

        let completed = match self.entries.remove(&header.frame_id) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        self.retire_older_than(header.frame_id);
        self.last_delivered = Some(header.frame_id);

        Ok(Some(completed.assemble()))
    }

    /// Drop in-progress frames older than the reassembly timeout
    ///
    /// Returns the number of frames dropped.
    pub fn sweep_expired(&mut self) -> usize {
        let timeout = self.entry_timeout;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.started_at.elapsed() < timeout);
        let dropped = before - self.entries.len();
        self.frames_evicted += dropped as u64;
        dropped
    }

    /// Number of in-progress frames
    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    /// Newest frame id handed out, if any
    pub fn last_delivered(&self) -> Option<u32> {
        self.last_delivered
    }

    /// Frames evicted incomplete since creation
    pub fn frames_evicted(&self) -> u64 {
        self.frames_evicted
    }

    /// A newly completed frame retires every older incomplete one.
    fn retire_older_than(&mut self, frame_id: u32) {
        let before = self.entries.len();
        self.entries.retain(|&id, _| id > frame_id);
        self.frames_evicted += (before - self.entries.len()) as u64;
    }

    /// Evict the oldest entry when the table is full and the newcomer is
    /// newer than it.
    fn make_room(&mut self, incoming_id: u32) {
        if self.entries.len() < self.max_entries {
            return;
        }
        if let Some(&oldest) = self.entries.keys().min() {
            if incoming_id > oldest {
                self.entries.remove(&oldest);
                self.frames_evicted += 1;
                trace!(frame_id = oldest, "evicted oldest incomplete frame");
            }
        }
    }
}
