//! Byte transport: `opc.tcp` over TCP or a UNIX stream socket, with the
//! 8-byte chunk-header framing and the HEL/ACK size negotiation.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use zerocopy::{AsBytes, FromBytes};

use opcua_core::codec::{BinaryDecode, BinaryEncode, BinaryReader};
use opcua_core::wire::{
    Acknowledge, ChunkHeader, ChunkKind, ErrorMessage, Hello, MessageKind, TransportLimits,
    WireError, CHUNK_HEADER_SIZE, PROTOCOL_VERSION,
};

use crate::error::{Error, Result};

// ── Endpoint URL ──────────────────────────────────────────────────────────────

const SCHEME: &str = "opc.tcp://";
const DEFAULT_PORT: u16 = 4840;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointTarget {
    Tcp { host: String, port: u16 },
    Unix { path: String },
}

/// `opc.tcp://host:port/path` or `opc.tcp://unix:/absolute/socket/path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointUrl {
    pub target: EndpointTarget,
    /// Path and query as advertised, leading slash included; empty if none.
    pub path: String,
    raw: String,
}

impl EndpointUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::usage(format!("endpoint url must start with {SCHEME}: {url}")))?;

        if let Some(path) = rest.strip_prefix("unix:") {
            if !path.starts_with('/') {
                return Err(Error::usage(format!("unix socket path must be absolute: {url}")));
            }
            return Ok(EndpointUrl {
                target: EndpointTarget::Unix {
                    path: path.to_string(),
                },
                path: String::new(),
                raw: url.to_string(),
            });
        }

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(Error::usage(format!("endpoint url has no host: {url}")));
        }

        // Bracketed IPv6 literals keep their colons.
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, rest) = bracketed
                .split_once(']')
                .ok_or_else(|| Error::usage(format!("unclosed IPv6 literal: {url}")))?;
            let port = match rest.strip_prefix(':') {
                Some(p) => p
                    .parse()
                    .map_err(|_| Error::usage(format!("invalid port in {url}")))?,
                None => DEFAULT_PORT,
            };
            (host.to_string(), port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (
                    host.to_string(),
                    port.parse()
                        .map_err(|_| Error::usage(format!("invalid port in {url}")))?,
                ),
                None => (authority.to_string(), DEFAULT_PORT),
            }
        };

        Ok(EndpointUrl {
            target: EndpointTarget::Tcp { host, port },
            path: path.to_string(),
            raw: url.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Keep this URL's host and port but take path and query from a
    /// server-advertised URL. Servers frequently advertise internal
    /// hostnames that do not resolve from the client's network.
    pub fn with_path_of(&self, advertised: &str) -> String {
        let advertised_path = EndpointUrl::parse(advertised)
            .map(|url| url.path)
            .unwrap_or_default();
        match &self.target {
            EndpointTarget::Tcp { host, port } => {
                let host = if host.contains(':') {
                    format!("[{host}]")
                } else {
                    host.clone()
                };
                format!("{SCHEME}{host}:{port}{advertised_path}")
            }
            EndpointTarget::Unix { path } => format!("{SCHEME}unix:{path}"),
        }
    }
}

impl std::fmt::Display for EndpointUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// A framed byte stream to one server.
pub enum Transport {
    Tcp(TcpStream),
    Unix(UnixStream),
}

/// Read half after [`Transport::into_split`]; owned by the reader task.
pub enum TransportReader {
    Tcp(tokio::net::tcp::OwnedReadHalf),
    Unix(tokio::net::unix::OwnedReadHalf),
}

/// Write half after [`Transport::into_split`].
pub enum TransportWriter {
    Tcp(tokio::net::tcp::OwnedWriteHalf),
    Unix(tokio::net::unix::OwnedWriteHalf),
}

/// One chunk as read off the wire: parsed header plus the body after it.
pub struct RawChunk {
    pub kind: MessageKind,
    pub chunk: ChunkKind,
    pub body: Bytes,
}

/// Read exactly the 8-byte chunk header. Not cancellation-safe; only the
/// dedicated reader owns a stream.
async fn read_header<R>(reader: &mut R) -> Result<ChunkHeader>
where
    R: AsyncReadExt + Unpin,
{
    let mut buf = [0u8; CHUNK_HEADER_SIZE];
    reader.read_exact(&mut buf).await?;
    Ok(ChunkHeader::read_from(&buf[..]).expect("header size is fixed"))
}

async fn read_chunk_from<R>(reader: &mut R, limits: &TransportLimits) -> Result<RawChunk>
where
    R: AsyncReadExt + Unpin,
{
    let header = read_header(reader).await?;
    let kind = header.message_kind()?;
    let chunk = header.chunk_kind()?;
    let size = header.size.get();
    if !limits.accepts_chunk(size) {
        return Err(WireError::ChunkTooLarge {
            size,
            limit: limits.receive_buffer_size,
        }
        .into());
    }
    let mut body = vec![0u8; size as usize - CHUNK_HEADER_SIZE];
    reader.read_exact(&mut body).await?;
    Ok(RawChunk {
        kind,
        chunk,
        body: Bytes::from(body),
    })
}

impl Transport {
    pub async fn connect(url: &EndpointUrl) -> Result<Self> {
        match &url.target {
            EndpointTarget::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                Ok(Transport::Tcp(stream))
            }
            EndpointTarget::Unix { path } => {
                Ok(Transport::Unix(UnixStream::connect(path).await?))
            }
        }
    }

    /// Split for the connection task: one side reads, the other writes.
    pub fn into_split(self) -> (TransportReader, TransportWriter) {
        match self {
            Transport::Tcp(stream) => {
                let (read, write) = stream.into_split();
                (TransportReader::Tcp(read), TransportWriter::Tcp(write))
            }
            Transport::Unix(stream) => {
                let (read, write) = stream.into_split();
                (TransportReader::Unix(read), TransportWriter::Unix(write))
            }
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            Transport::Tcp(stream) => stream.write_all(bytes).await?,
            Transport::Unix(stream) => stream.write_all(bytes).await?,
        }
        Ok(())
    }

    /// Read exactly the 8-byte chunk header.
    pub async fn receive_header(&mut self) -> Result<ChunkHeader> {
        match self {
            Transport::Tcp(stream) => read_header(stream).await,
            Transport::Unix(stream) => read_header(stream).await,
        }
    }

    /// Read the remaining `n = total − 8` bytes of a chunk.
    pub async fn receive(&mut self, n: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; n];
        match self {
            Transport::Tcp(stream) => stream.read_exact(&mut buf).await?,
            Transport::Unix(stream) => stream.read_exact(&mut buf).await?,
        };
        Ok(Bytes::from(buf))
    }

    /// Read one full chunk, enforcing the negotiated receive-buffer size.
    pub async fn receive_chunk(&mut self, limits: &TransportLimits) -> Result<RawChunk> {
        match self {
            Transport::Tcp(stream) => read_chunk_from(stream, limits).await,
            Transport::Unix(stream) => read_chunk_from(stream, limits).await,
        }
    }

    /// Frame and send one chunk.
    async fn send_chunk(
        &mut self,
        kind: MessageKind,
        chunk: ChunkKind,
        body: &[u8],
    ) -> Result<()> {
        let frame = frame_chunk(kind, chunk, body);
        self.send(&frame).await
    }

    /// HEL/ACK exchange. Returns the revised limits; an ERR chunk or a
    /// protocol-version mismatch terminates the connection.
    pub async fn hello(
        &mut self,
        endpoint_url: &str,
        requested: TransportLimits,
    ) -> Result<TransportLimits> {
        let hello = Hello {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: requested.receive_buffer_size,
            send_buffer_size: requested.send_buffer_size,
            max_message_size: requested.max_message_size,
            max_chunk_count: requested.max_chunk_count,
            endpoint_url: endpoint_url.to_string(),
        };
        self.send_chunk(MessageKind::Hello, ChunkKind::Final, &hello.encode_to_vec())
            .await?;

        let raw = self.receive_chunk(&requested).await?;
        match raw.kind {
            MessageKind::Acknowledge => {
                let mut reader = BinaryReader::new(&raw.body);
                let ack = Acknowledge::decode(&mut reader)?;
                if ack.protocol_version < PROTOCOL_VERSION {
                    return Err(WireError::ProtocolVersionMismatch {
                        server: ack.protocol_version,
                    }
                    .into());
                }
                let revised = requested.revised(&ack)?;
                tracing::debug!(
                    send_buffer = revised.send_buffer_size,
                    receive_buffer = revised.receive_buffer_size,
                    max_message_size = revised.max_message_size,
                    max_chunk_count = revised.max_chunk_count,
                    "transport limits negotiated"
                );
                Ok(revised)
            }
            MessageKind::Error => Err(decode_error_chunk(&raw.body)),
            other => Err(WireError::UnknownMessageType(other.code()).into()),
        }
    }
}

impl TransportReader {
    pub async fn receive_chunk(&mut self, limits: &TransportLimits) -> Result<RawChunk> {
        match self {
            TransportReader::Tcp(stream) => read_chunk_from(stream, limits).await,
            TransportReader::Unix(stream) => read_chunk_from(stream, limits).await,
        }
    }
}

impl TransportWriter {
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match self {
            TransportWriter::Tcp(stream) => stream.write_all(bytes).await?,
            TransportWriter::Unix(stream) => stream.write_all(bytes).await?,
        }
        Ok(())
    }
}

/// Build the framed bytes for one chunk.
pub fn frame_chunk(kind: MessageKind, chunk: ChunkKind, body: &[u8]) -> BytesMut {
    let total = (CHUNK_HEADER_SIZE + body.len()) as u32;
    let header = ChunkHeader::new(kind, chunk, total);
    let mut frame = BytesMut::with_capacity(total as usize);
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Turn an ERR chunk body into the terminal error it represents.
pub fn decode_error_chunk(body: &[u8]) -> Error {
    let mut reader = BinaryReader::new(body);
    match ErrorMessage::decode(&mut reader) {
        Ok(message) => Error::ServerError {
            status: message.error,
            reason: message.reason.unwrap_or_default(),
        },
        Err(e) => e.into(),
    }
}
