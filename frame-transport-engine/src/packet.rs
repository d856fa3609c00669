//! Wire packet format for the frame transport
//!
//! Every datagram starts with a fixed 14-byte header tagging the stream,
//! the frame it belongs to and its position within that frame. Control
//! packets (handshake and teardown) carry a small JSON body; data packets
//! carry a fragment of a submitted frame.
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
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Protocol version advertised during the handshake
pub const PROTOCOL_VERSION: &str = "1.0";

/// Media stream category carried by a session
///
/// `repr(C)` so the value crosses the foreign boundary unchanged. Each
/// variant owns an independent session and frame-id space.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    /// Audio frames
    Audio = 0,
    /// Video frames
    Video = 1,
}

impl StreamType {
    /// Number of stream types; sizes the fixed session table
    pub const COUNT: usize = 2;

    /// Slot index for the fixed session table
    pub fn index(self) -> usize {
        self as usize
    }

    /// Parse stream type from its wire byte
    pub fn from_byte(byte: u8) -> TransportResult<Self> {
        match byte {
            0 => Ok(StreamType::Audio),
            1 => Ok(StreamType::Video),
            other => Err(TransportError::PacketParse(format!(
                "unknown stream type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamType::Audio => write!(f, "audio"),
            StreamType::Video => write!(f, "video"),
        }
    }
}

/// Packet kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Fragment of a media frame
    Data = 0,
    /// Client handshake request
    Hello = 1,
    /// Host handshake acknowledgment
    HelloAck = 2,
    /// Liveness probe, empty payload
    Keepalive = 3,
    /// Orderly teardown notice
    Bye = 4,
}

impl PacketKind {
    /// Parse packet kind from its wire byte
    pub fn from_byte(byte: u8) -> TransportResult<Self> {
        match byte {
            0 => Ok(PacketKind::Data),
            1 => Ok(PacketKind::Hello),
            2 => Ok(PacketKind::HelloAck),
            3 => Ok(PacketKind::Keepalive),
            4 => Ok(PacketKind::Bye),
            other => Err(TransportError::PacketParse(format!(
                "unknown packet kind: {}",
                other
            ))),
        }
    }
}

/// Fixed transport header preceding every payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet kind
    pub kind: PacketKind,
    /// Stream the packet belongs to
    pub stream: StreamType,
    /// Frame id (0 for control packets)
    pub frame_id: u32,
    /// Zero-based fragment index
    pub fragment_index: u16,
    /// Total fragments in the frame (1 for unfragmented frames)
    pub fragment_count: u16,
}

impl PacketHeader {
    /// Serialized header size in bytes
    pub const SIZE: usize = 14;

    /// Wire format version (first header byte)
    pub const VERSION: u8 = 1;

    /// Parse a header from the front of a datagram
    ///
    /// Returns the header and the remaining payload slice.
    pub fn parse(data: &[u8]) -> TransportResult<(Self, &[u8])> {
        if data.len() < Self::SIZE {
            return Err(TransportError::PacketParse(format!(
                "datagram too short: {} bytes",
                data.len()
            )));
        }

        // Byte 0: version
        let version = data[0];
        if version != Self::VERSION {
            return Err(TransportError::PacketParse(format!(
                "unsupported wire version: {}",
                version
            )));
        }

        // Byte 1: kind, byte 2: stream, byte 3: reserved
        let kind = PacketKind::from_byte(data[1])?;
        let stream = StreamType::from_byte(data[2])?;

        let frame_id = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let fragment_index = u16::from_be_bytes([data[8], data[9]]);
        let fragment_count = u16::from_be_bytes([data[10], data[11]]);
        let payload_len = u16::from_be_bytes([data[12], data[13]]) as usize;

        let payload = &data[Self::SIZE..];
        if payload.len() != payload_len {
            return Err(TransportError::PacketParse(format!(
                "payload length mismatch: header says {}, datagram has {}",
                payload_len,
                payload.len()
            )));
        }

        let header = PacketHeader {
            kind,
            stream,
            frame_id,
            fragment_index,
            fragment_count,
        };

        Ok((header, payload))
    }
}

/// A complete transport packet
#[derive(Debug, Clone)]
pub struct Packet {
    /// Transport header
    pub header: PacketHeader,
    /// Payload data
    pub payload: Bytes,
}

impl Packet {
    /// Parse a packet from a received datagram
    pub fn parse(data: &[u8]) -> TransportResult<Self> {
        let (header, payload) = PacketHeader::parse(data)?;
        Ok(Packet {
            header,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Serialize the packet into a wire-ready buffer
    pub fn serialize(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(PacketHeader::SIZE + self.payload.len());

        buf.put_u8(PacketHeader::VERSION);
        buf.put_u8(self.header.kind as u8);
        buf.put_u8(self.header.stream as u8);
        buf.put_u8(0); // reserved
        buf.put_u32(self.header.frame_id);
        buf.put_u16(self.header.fragment_index);
        buf.put_u16(self.header.fragment_count);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);

        buf
    }

    /// Build a control packet carrying a serialized control message
    pub fn control(stream: StreamType, message: &ControlMessage) -> TransportResult<Self> {
        let kind = match message {
            ControlMessage::Hello(_) => PacketKind::Hello,
            ControlMessage::HelloAck(_) => PacketKind::HelloAck,
            ControlMessage::Bye(_) => PacketKind::Bye,
        };

        Ok(Packet {
            header: PacketHeader {
                kind,
                stream,
                frame_id: 0,
                fragment_index: 0,
                fragment_count: 1,
            },
            payload: message.to_bytes()?,
        })
    }

    /// Build an empty keepalive packet
    pub fn keepalive(stream: StreamType) -> Self {
        Packet {
            header: PacketHeader {
                kind: PacketKind::Keepalive,
                stream,
                frame_id: 0,
                fragment_index: 0,
                fragment_count: 1,
            },
            payload: Bytes::new(),
        }
    }
}

/// Control-plane message carried by handshake and teardown packets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Connection request (client to host)
    #[serde(rename = "HELLO")]
    Hello(Hello),
    /// Connection acknowledgment (host to client)
    #[serde(rename = "HELLO_ACK")]
    HelloAck(HelloAck),
    /// Teardown notice
    #[serde(rename = "BYE")]
    Bye(Bye),
}

/// Connection request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Hello {
    /// Protocol version
    pub version: String,
    /// Session ID chosen by the client, echoed in the acknowledgment
    pub session_id: Uuid,
}

/// Connection acknowledgment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloAck {
    /// Session ID echoed from the request
    pub session_id: Uuid,
    /// Accepted version
    pub version: String,
}

/// Teardown notice
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bye {
    /// Teardown reason
    pub reason: ByeReason,
}

/// Teardown reason
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ByeReason {
    /// Endpoint shut down on request
    Shutdown,
    /// Peer went silent past the keepalive window
    Timeout,
    /// Unrecoverable protocol violation
    ProtocolError,
}

impl ControlMessage {
    /// Serialize to a packet payload
    pub fn to_bytes(&self) -> TransportResult<Bytes> {
        let body = serde_json::to_vec(self)
            .map_err(|e| TransportError::PacketParse(format!("control encode error: {}", e)))?;
        Ok(Bytes::from(body))
    }

    /// Parse from a packet payload
    pub fn from_bytes(payload: &[u8]) -> TransportResult<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| TransportError::PacketParse(format!("control decode error: {}", e)))
    }
}
