//! Delivery seam for reassembled inbound frames
//!
//! Decoding and rendering live outside this crate; the runtime hands
//! complete frames to whatever sink the embedding application installs.
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


use crate::packet::StreamType;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

/// Receiver for complete inbound frames
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Called once per reassembled frame, in delivery order per stream
    async fn deliver(&self, stream: StreamType, frame_id: u32, payload: Bytes);
}

/// Default sink that only logs deliveries
///
/// Used when the embedding application has not wired a media consumer
/// yet; frames are counted and dropped.
pub struct LogSink;

#[async_trait]
impl FrameSink for LogSink {
    async fn deliver(&self, stream: StreamType, frame_id: u32, payload: Bytes) {
        debug!(
            stream = %stream,
            frame_id = frame_id,
            len = payload.len(),
            "frame delivered (no sink installed)"
        );
    }
}
