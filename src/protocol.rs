//! Wire protocol and message framing
//!
//! Every message is a fixed 24-byte little-endian header followed by an
//! optional payload. Audio payloads are raw interleaved f32 samples; the
//! `ClientConfig` payload is the 12-byte [`AudioConfig`] blob.

use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};

use crate::config::AudioConfig;
use crate::constants::MAX_MESSAGE;
use crate::error::ProtocolError;

/// "AUDS" when the little-endian u32 is read back as ASCII
pub const MAGIC: u32 = 0x4155_4453;

/// Fixed header size on the wire
pub const HEADER_SIZE: usize = 24;

/// Message type tag (u16 on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    Connect = 1,
    Disconnect = 2,
    AudioData = 3,
    Heartbeat = 4,
    ClientReady = 5,
    ClientConfig = 6,
}

impl MessageType {
    pub fn from_wire(raw: u16) -> Option<Self> {
        match raw {
            1 => Some(Self::Connect),
            2 => Some(Self::Disconnect),
            3 => Some(Self::AudioData),
            4 => Some(Self::Heartbeat),
            5 => Some(Self::ClientReady),
            6 => Some(Self::ClientConfig),
            _ => None,
        }
    }
}

/// A framed protocol message.
///
/// `sequence` increases by one per `AudioData` packet per sender and stays
/// zero for control messages. `timestamp` is sender-side milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageType,
    pub sequence: u32,
    pub timestamp: u64,
    pub payload: Bytes,
}

impl Message {
    fn control(kind: MessageType) -> Self {
        Self {
            kind,
            sequence: 0,
            timestamp: timestamp_ms(),
            payload: Bytes::new(),
        }
    }

    pub fn connect() -> Self {
        Self::control(MessageType::Connect)
    }

    pub fn disconnect() -> Self {
        Self::control(MessageType::Disconnect)
    }

    pub fn heartbeat() -> Self {
        Self::control(MessageType::Heartbeat)
    }

    pub fn client_ready() -> Self {
        Self::control(MessageType::ClientReady)
    }

    pub fn client_config(config: &AudioConfig) -> Self {
        Self {
            kind: MessageType::ClientConfig,
            sequence: 0,
            timestamp: timestamp_ms(),
            payload: Bytes::copy_from_slice(&config.to_payload()),
        }
    }

    /// Build an `AudioData` message from interleaved f32 samples.
    pub fn audio(sequence: u32, timestamp: u64, samples: &[f32]) -> Self {
        let mut payload = BytesMut::with_capacity(samples.len() * 4);
        for sample in samples {
            payload.extend_from_slice(&sample.to_le_bytes());
        }
        Self {
            kind: MessageType::AudioData,
            sequence,
            timestamp,
            payload: payload.freeze(),
        }
    }

    /// Total length on the wire, header included.
    pub fn wire_length(&self) -> u32 {
        (HEADER_SIZE + self.payload.len()) as u32
    }

    /// Decode an audio payload back into samples.
    pub fn samples(&self) -> Result<Vec<f32>, ProtocolError> {
        if self.payload.len() % 4 != 0 {
            return Err(ProtocolError::Alignment(self.payload.len()));
        }
        Ok(self
            .payload
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
            .collect())
    }

    /// Decode a `ClientConfig` payload.
    pub fn audio_config(&self) -> Option<AudioConfig> {
        AudioConfig::from_payload(&self.payload)
    }

    /// Serialize to a single contiguous buffer ready for the socket.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&(self.kind as u16).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&self.wire_length().to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }
}

/// Milliseconds since the Unix epoch. The protocol only ever compares
/// differences, so the epoch itself is arbitrary.
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Read one framed message from a blocking reader.
///
/// A clean EOF at a header boundary is reported as `Disconnected`; EOF in the
/// middle of a frame is a framing error.
pub fn read_message(reader: &mut impl Read) -> Result<Message, ProtocolError> {
    let mut header = [0u8; HEADER_SIZE];
    if let Err(e) = reader.read_exact(&mut header) {
        return Err(match e.kind() {
            io::ErrorKind::UnexpectedEof => ProtocolError::Disconnected,
            _ => ProtocolError::Io(e),
        });
    }

    let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(ProtocolError::Framing(format!("bad magic {magic:#010x}")));
    }

    let raw_kind = u16::from_le_bytes(header[4..6].try_into().unwrap());
    let kind = MessageType::from_wire(raw_kind)
        .ok_or_else(|| ProtocolError::Framing(format!("unknown message type {raw_kind}")))?;

    let length = u32::from_le_bytes(header[8..12].try_into().unwrap());
    if (length as usize) < HEADER_SIZE {
        return Err(ProtocolError::Framing(format!("length {length} below header size")));
    }
    if length as usize > MAX_MESSAGE {
        return Err(ProtocolError::Oversize(length));
    }

    let sequence = u32::from_le_bytes(header[12..16].try_into().unwrap());
    let timestamp = u64::from_le_bytes(header[16..24].try_into().unwrap());

    let payload_len = length as usize - HEADER_SIZE;
    let mut payload = vec![0u8; payload_len];
    if payload_len > 0 {
        reader.read_exact(&mut payload).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => {
                ProtocolError::Framing("truncated payload".to_string())
            }
            _ => ProtocolError::Io(e),
        })?;
    }

    Ok(Message {
        kind,
        sequence,
        timestamp,
        payload: Bytes::from(payload),
    })
}

/// Write one framed message to a blocking writer.
pub fn write_message(writer: &mut impl Write, message: &Message) -> io::Result<()> {
    writer.write_all(&message.encode())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: Message) -> Message {
        let bytes = message.encode();
        read_message(&mut bytes.as_ref()).expect("decode failed")
    }

    #[test]
    fn test_audio_round_trip() {
        let samples: Vec<f32> = (0..512).map(|i| (i as f32 / 512.0).sin()).collect();
        let message = Message::audio(42, 123_456, &samples);
        let decoded = round_trip(message.clone());

        assert_eq!(decoded, message);
        assert_eq!(decoded.samples().unwrap(), samples);
    }

    #[test]
    fn test_control_round_trip() {
        for message in [
            Message::connect(),
            Message::disconnect(),
            Message::heartbeat(),
            Message::client_ready(),
        ] {
            let decoded = round_trip(message.clone());
            assert_eq!(decoded, message);
            assert!(decoded.payload.is_empty());
            assert_eq!(decoded.sequence, 0);
        }
    }

    #[test]
    fn test_config_round_trip() {
        let config = AudioConfig::new(48000, 2, 256);
        let decoded = round_trip(Message::client_config(&config));
        assert_eq!(decoded.audio_config(), Some(config));
    }

    #[test]
    fn test_header_layout() {
        let message = Message::audio(7, 9, &[1.0f32]);
        let bytes = message.encode();

        assert_eq!(&bytes[0..4], &[0x53, 0x44, 0x55, 0x41]);
        assert_eq!(u16::from_le_bytes(bytes[4..6].try_into().unwrap()), 3);
        assert_eq!(&bytes[6..8], &[0, 0]);
        assert_eq!(
            u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            HEADER_SIZE as u32 + 4
        );
        assert_eq!(u32::from_le_bytes(bytes[12..16].try_into().unwrap()), 7);
        assert_eq!(u64::from_le_bytes(bytes[16..24].try_into().unwrap()), 9);
        assert_eq!(bytes.len(), HEADER_SIZE + 4);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = Message::heartbeat().encode().to_vec();
        bytes[0] ^= 0xff;
        assert!(matches!(
            read_message(&mut bytes.as_slice()),
            Err(ProtocolError::Framing(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_type() {
        let mut bytes = Message::heartbeat().encode().to_vec();
        bytes[4] = 99;
        assert!(matches!(
            read_message(&mut bytes.as_slice()),
            Err(ProtocolError::Framing(_))
        ));
    }

    #[test]
    fn test_rejects_short_length() {
        let mut bytes = Message::heartbeat().encode().to_vec();
        bytes[8..12].copy_from_slice(&8u32.to_le_bytes());
        assert!(matches!(
            read_message(&mut bytes.as_slice()),
            Err(ProtocolError::Framing(_))
        ));
    }

    #[test]
    fn test_rejects_oversize() {
        let mut bytes = Message::heartbeat().encode().to_vec();
        bytes[8..12].copy_from_slice(&(1u32 << 31).to_le_bytes());
        assert!(matches!(
            read_message(&mut bytes.as_slice()),
            Err(ProtocolError::Oversize(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let bytes = Message::audio(0, 0, &[0.5f32; 16]).encode();
        let truncated = &bytes[..bytes.len() - 7];
        assert!(matches!(
            read_message(&mut &truncated[..]),
            Err(ProtocolError::Framing(_))
        ));
    }

    #[test]
    fn test_clean_eof_is_disconnect() {
        let empty: &[u8] = &[];
        assert!(matches!(
            read_message(&mut &empty[..]),
            Err(ProtocolError::Disconnected)
        ));
    }

    #[test]
    fn test_misaligned_audio_payload() {
        let mut message = Message::audio(0, 0, &[0.5f32]);
        message.payload = Bytes::from_static(&[1, 2, 3]);
        assert!(matches!(
            message.samples(),
            Err(ProtocolError::Alignment(3))
        ));
    }
}
