//! Transport wire format — chunk framing and the connection-setup bodies.
//!
//! Every chunk on the wire starts with the same 8-byte header: a three-byte
//! ASCII message type, a one-byte chunk flag, and the total chunk size
//! including the header, little-endian. The fixed-layout headers are zerocopy
//! structs so they can be read straight off a receive buffer; the
//! variable-length bodies use the regular codec.

use bytes::{BufMut, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::codec::{write_string, BinaryDecode, BinaryEncode, BinaryReader, CodecError};
use crate::types::{ByteString, StatusCode};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Binary protocol version sent in Hello.
pub const PROTOCOL_VERSION: u32 = 0;

/// Smallest receive/send buffer either side may announce.
pub const MIN_BUFFER_SIZE: u32 = 8192;

/// Size of the fixed chunk header.
pub const CHUNK_HEADER_SIZE: usize = 8;

/// Sequence and symmetric security headers are each this long.
pub const SEQUENCE_HEADER_SIZE: usize = 8;
pub const SYMMETRIC_HEADER_SIZE: usize = 8;

// ── Message and chunk kinds ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Hello,
    Acknowledge,
    OpenChannel,
    CloseChannel,
    Message,
    Error,
}

impl MessageKind {
    pub const fn code(self) -> [u8; 3] {
        match self {
            MessageKind::Hello => *b"HEL",
            MessageKind::Acknowledge => *b"ACK",
            MessageKind::OpenChannel => *b"OPN",
            MessageKind::CloseChannel => *b"CLO",
            MessageKind::Message => *b"MSG",
            MessageKind::Error => *b"ERR",
        }
    }

    pub fn from_code(code: [u8; 3]) -> Result<Self, WireError> {
        Ok(match &code {
            b"HEL" => MessageKind::Hello,
            b"ACK" => MessageKind::Acknowledge,
            b"OPN" => MessageKind::OpenChannel,
            b"CLO" => MessageKind::CloseChannel,
            b"MSG" => MessageKind::Message,
            b"ERR" => MessageKind::Error,
            _ => return Err(WireError::UnknownMessageType(code)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkKind {
    /// Final chunk of a message.
    Final = b'F',
    /// More chunks follow.
    Intermediate = b'C',
    /// Sender abandoned the message.
    Abort = b'A',
}

impl ChunkKind {
    pub fn from_u8(value: u8) -> Result<Self, WireError> {
        match value {
            b'F' => Ok(ChunkKind::Final),
            b'C' => Ok(ChunkKind::Intermediate),
            b'A' => Ok(ChunkKind::Abort),
            other => Err(WireError::UnknownChunkFlag(other)),
        }
    }
}

// ── Fixed headers ─────────────────────────────────────────────────────────────

/// The 8-byte header that precedes every chunk.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct ChunkHeader {
    pub message_type: [u8; 3],
    pub chunk_flag: u8,
    /// Total chunk size including this header.
    pub size: U32<LittleEndian>,
}

assert_eq_size!(ChunkHeader, [u8; CHUNK_HEADER_SIZE]);

impl ChunkHeader {
    pub fn new(kind: MessageKind, chunk: ChunkKind, size: u32) -> Self {
        ChunkHeader {
            message_type: kind.code(),
            chunk_flag: chunk as u8,
            size: U32::new(size),
        }
    }

    pub fn message_kind(&self) -> Result<MessageKind, WireError> {
        MessageKind::from_code(self.message_type)
    }

    pub fn chunk_kind(&self) -> Result<ChunkKind, WireError> {
        ChunkKind::from_u8(self.chunk_flag)
    }
}

/// Sequence number and request id, first fields of every secured body.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct SequenceHeader {
    pub sequence_number: U32<LittleEndian>,
    pub request_id: U32<LittleEndian>,
}

assert_eq_size!(SequenceHeader, [u8; SEQUENCE_HEADER_SIZE]);

impl SequenceHeader {
    pub fn new(sequence_number: u32, request_id: u32) -> Self {
        SequenceHeader {
            sequence_number: U32::new(sequence_number),
            request_id: U32::new(request_id),
        }
    }
}

/// Channel and token ids stamped on every symmetric MSG/CLO chunk.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct SymmetricSecurityHeader {
    pub channel_id: U32<LittleEndian>,
    pub token_id: U32<LittleEndian>,
}

assert_eq_size!(SymmetricSecurityHeader, [u8; SYMMETRIC_HEADER_SIZE]);

impl SymmetricSecurityHeader {
    pub fn new(channel_id: u32, token_id: u32) -> Self {
        SymmetricSecurityHeader {
            channel_id: U32::new(channel_id),
            token_id: U32::new(token_id),
        }
    }
}

// ── Asymmetric security header ────────────────────────────────────────────────

/// Header of an OPN chunk: channel id, policy URI, sender certificate and
/// receiver certificate thumbprint. Null cert/thumbprint under policy None.
#[derive(Debug, Clone, PartialEq)]
pub struct AsymmetricSecurityHeader {
    pub channel_id: u32,
    pub policy_uri: String,
    pub sender_certificate: ByteString,
    pub receiver_thumbprint: ByteString,
}

impl BinaryEncode for AsymmetricSecurityHeader {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(self.channel_id);
        write_string(out, Some(&self.policy_uri));
        self.sender_certificate.encode(out);
        self.receiver_thumbprint.encode(out);
    }
}

impl BinaryDecode for AsymmetricSecurityHeader {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        Ok(AsymmetricSecurityHeader {
            channel_id: input.read_u32()?,
            policy_uri: input.read_string()?.unwrap_or_default(),
            sender_certificate: ByteString::decode(input)?,
            receiver_thumbprint: ByteString::decode(input)?,
        })
    }
}

// ── Connection-setup bodies ───────────────────────────────────────────────────

/// HEL body. Zero in `max_message_size`/`max_chunk_count` means unlimited.
#[derive(Debug, Clone, PartialEq)]
pub struct Hello {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
    pub endpoint_url: String,
}

impl BinaryEncode for Hello {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(self.protocol_version);
        out.put_u32_le(self.receive_buffer_size);
        out.put_u32_le(self.send_buffer_size);
        out.put_u32_le(self.max_message_size);
        out.put_u32_le(self.max_chunk_count);
        write_string(out, Some(&self.endpoint_url));
    }
}

impl BinaryDecode for Hello {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        Ok(Hello {
            protocol_version: input.read_u32()?,
            receive_buffer_size: input.read_u32()?,
            send_buffer_size: input.read_u32()?,
            max_message_size: input.read_u32()?,
            max_chunk_count: input.read_u32()?,
            endpoint_url: input.read_string()?.unwrap_or_default(),
        })
    }
}

/// ACK body — Hello minus the endpoint URL.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Acknowledge {
    pub protocol_version: u32,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

impl BinaryEncode for Acknowledge {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u32_le(self.protocol_version);
        out.put_u32_le(self.receive_buffer_size);
        out.put_u32_le(self.send_buffer_size);
        out.put_u32_le(self.max_message_size);
        out.put_u32_le(self.max_chunk_count);
    }
}

impl BinaryDecode for Acknowledge {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        Ok(Acknowledge {
            protocol_version: input.read_u32()?,
            receive_buffer_size: input.read_u32()?,
            send_buffer_size: input.read_u32()?,
            max_message_size: input.read_u32()?,
            max_chunk_count: input.read_u32()?,
        })
    }
}

/// ERR body — terminates the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub error: StatusCode,
    pub reason: Option<String>,
}

impl BinaryEncode for ErrorMessage {
    fn encode(&self, out: &mut BytesMut) {
        self.error.encode(out);
        write_string(out, self.reason.as_deref());
    }
}

impl BinaryDecode for ErrorMessage {
    fn decode(input: &mut BinaryReader<'_>) -> Result<Self, CodecError> {
        Ok(ErrorMessage {
            error: StatusCode::decode(input)?,
            reason: input.read_string()?,
        })
    }
}

// ── Negotiated limits ─────────────────────────────────────────────────────────

/// The sizes both sides agreed on during HEL/ACK.
///
/// `send_buffer_size` bounds the chunks this client emits;
/// `receive_buffer_size` bounds what it will accept. Zero in the message and
/// chunk limits means unlimited.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportLimits {
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

impl Default for TransportLimits {
    fn default() -> Self {
        TransportLimits {
            receive_buffer_size: 65_535,
            send_buffer_size: 65_535,
            max_message_size: 16 * 1024 * 1024,
            max_chunk_count: 4096,
        }
    }
}

impl TransportLimits {
    /// Apply the server's ACK revision. The server may only shrink buffers;
    /// values below the protocol minimum are rejected.
    pub fn revised(self, ack: &Acknowledge) -> Result<TransportLimits, WireError> {
        if ack.receive_buffer_size < MIN_BUFFER_SIZE || ack.send_buffer_size < MIN_BUFFER_SIZE {
            return Err(WireError::BufferTooSmall {
                size: ack.receive_buffer_size.min(ack.send_buffer_size),
            });
        }
        Ok(TransportLimits {
            // The server's receive buffer caps what we may send, and vice
            // versa.
            send_buffer_size: ack.receive_buffer_size.min(self.send_buffer_size),
            receive_buffer_size: ack.send_buffer_size.min(self.receive_buffer_size),
            max_message_size: ack.max_message_size,
            max_chunk_count: ack.max_chunk_count,
        })
    }

    /// Does an incoming chunk of `size` bytes fit our receive buffer?
    pub fn accepts_chunk(&self, size: u32) -> bool {
        size >= CHUNK_HEADER_SIZE as u32 && size <= self.receive_buffer_size
    }

    /// Does an assembled message of `size` bytes fit the message limit?
    pub fn accepts_message(&self, size: usize) -> bool {
        self.max_message_size == 0 || size <= self.max_message_size as usize
    }

    /// Is a message of `count` chunks within the chunk-count limit?
    pub fn accepts_chunk_count(&self, count: u32) -> bool {
        self.max_chunk_count == 0 || count <= self.max_chunk_count
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown message type {:?}", String::from_utf8_lossy(.0))]
    UnknownMessageType([u8; 3]),

    #[error("unknown chunk flag 0x{0:02x}")]
    UnknownChunkFlag(u8),

    #[error("negotiated buffer size {size} is below the {MIN_BUFFER_SIZE}-byte minimum")]
    BufferTooSmall { size: u32 },

    #[error("chunk size {size} outside negotiated limit {limit}")]
    ChunkTooLarge { size: u32, limit: u32 },

    #[error("message exceeds negotiated size or chunk-count limit")]
    MessageTooLarge,

    #[error("protocol version {server} not supported (client speaks {PROTOCOL_VERSION})")]
    ProtocolVersionMismatch { server: u32 },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
