//! Secure-channel state machine: OPN handshake, per-chunk symmetric
//! protection, sequence-number enforcement and token renewal.
//!
//! This module owns no socket. It turns outgoing payloads into framed chunk
//! bytes and incoming chunk bytes into verified payloads; the connection task
//! moves those bytes. Keeping it pure means the replay and tamper defenses
//! are testable without a server on the other end.

use std::time::Instant;

use bytes::BytesMut;
use zerocopy::{AsBytes, FromBytes};

use opcua_core::codec::{BinaryDecode, BinaryEncode, BinaryReader};
use opcua_core::crypto::cert::{ApplicationIdentity, Certificate};
use opcua_core::crypto::{padding, CryptoSuite, MessageSecurityMode, SecurityPolicy};
use opcua_core::types::{ByteString, NodeId, RequestHeader};
use opcua_core::wire::{
    AsymmetricSecurityHeader, ChunkKind, MessageKind, SequenceHeader, SymmetricSecurityHeader,
    TransportLimits, WireError, CHUNK_HEADER_SIZE, PROTOCOL_VERSION, SEQUENCE_HEADER_SIZE,
    SYMMETRIC_HEADER_SIZE,
};

use crate::error::{Error, Result, SequencingError};
use crate::messages::secure_channel::{
    ChannelSecurityToken, CloseSecureChannelRequest, OpenSecureChannelRequest,
    OpenSecureChannelResponse, SecurityTokenRequestType, CLOSE_SECURE_CHANNEL_REQUEST_TYPE_ID,
    OPEN_SECURE_CHANNEL_REQUEST_TYPE_ID, OPEN_SECURE_CHANNEL_RESPONSE_TYPE_ID,
};
use crate::messages::{ServiceFault, SERVICE_FAULT_TYPE_ID};
use crate::transport::{frame_chunk, RawChunk};

/// Renew the token once this share of its lifetime has elapsed.
const RENEWAL_FRACTION: f64 = 0.75;

/// Default requested token lifetime, milliseconds.
pub const DEFAULT_TOKEN_LIFETIME_MS: u32 = 3_600_000;

// ── State machine ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    HelloSent,
    Acknowledged,
    Opening,
    Open,
    Closing,
}

// ── Sequence-number validation ────────────────────────────────────────────────

/// Replay defense: server sequence numbers must strictly increase within a
/// token, with exactly one 32-bit wrap permitted.
#[derive(Debug, Default)]
pub struct SequenceValidator {
    last: Option<u32>,
    wrapped: bool,
}

impl SequenceValidator {
    pub fn validate(&mut self, sequence: u32) -> Result<(), SequencingError> {
        match self.last {
            None => {
                self.last = Some(sequence);
                Ok(())
            }
            Some(last) if sequence > last => {
                self.last = Some(sequence);
                Ok(())
            }
            Some(last) if sequence == last => Err(SequencingError::Duplicate(sequence)),
            Some(_) if self.wrapped => Err(SequencingError::DoubleRollover),
            Some(_) => {
                self.wrapped = true;
                self.last = Some(sequence);
                Ok(())
            }
        }
    }

    /// New token, new window.
    pub fn reset(&mut self) {
        self.last = None;
        self.wrapped = false;
    }
}

// ── Opened chunk ──────────────────────────────────────────────────────────────

/// A verified, decrypted chunk body.
#[derive(Debug)]
pub struct OpenedChunk {
    pub request_id: u32,
    pub chunk: ChunkKind,
    /// Payload after the sequence header: `TypeId ‖ Body` (or a slice of it
    /// for intermediate chunks).
    pub payload: Vec<u8>,
}

// ── SecureChannel ─────────────────────────────────────────────────────────────

pub struct SecureChannel {
    state: ChannelState,
    policy: SecurityPolicy,
    mode: MessageSecurityMode,
    suite: Box<dyn CryptoSuite>,
    /// Old token kept alive until the server first uses the new one.
    previous: Option<(u32, Box<dyn CryptoSuite>)>,
    identity: Option<ApplicationIdentity>,
    remote_certificate: Option<Certificate>,
    channel_id: u32,
    token_id: u32,
    token_created: Instant,
    token_lifetime_ms: u32,
    requested_lifetime_ms: u32,
    next_sequence_number: u32,
    next_request_id: u32,
    rx_sequence: SequenceValidator,
    /// Client nonce of an in-flight OPN, consumed by the response.
    pending_nonce: Option<Vec<u8>>,
    limits: TransportLimits,
}

impl SecureChannel {
    pub fn new(
        policy: SecurityPolicy,
        mode: MessageSecurityMode,
        identity: Option<ApplicationIdentity>,
        remote_certificate: Option<Certificate>,
    ) -> Result<Self> {
        let suite = policy.client_suite(identity.as_ref(), remote_certificate.as_ref())?;
        Ok(SecureChannel {
            state: ChannelState::Closed,
            policy,
            mode,
            suite,
            previous: None,
            identity,
            remote_certificate,
            channel_id: 0,
            token_id: 0,
            token_created: Instant::now(),
            token_lifetime_ms: 0,
            requested_lifetime_ms: DEFAULT_TOKEN_LIFETIME_MS,
            next_sequence_number: 0,
            next_request_id: 0,
            rx_sequence: SequenceValidator::default(),
            pending_nonce: None,
            limits: TransportLimits::default(),
        })
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    pub fn policy(&self) -> SecurityPolicy {
        self.policy
    }

    pub fn mode(&self) -> MessageSecurityMode {
        self.mode
    }

    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    pub fn token_id(&self) -> u32 {
        self.token_id
    }

    pub fn limits(&self) -> &TransportLimits {
        &self.limits
    }

    pub fn set_requested_lifetime(&mut self, lifetime_ms: u32) {
        self.requested_lifetime_ms = lifetime_ms;
    }

    /// The server certificate, once known.
    pub fn remote_certificate(&self) -> Option<&Certificate> {
        self.remote_certificate.as_ref()
    }

    pub fn on_hello_sent(&mut self) {
        self.state = ChannelState::HelloSent;
    }

    pub fn on_acknowledged(&mut self, limits: TransportLimits) {
        self.limits = limits;
        self.state = ChannelState::Acknowledged;
    }

    pub fn mark_closed(&mut self) {
        self.state = ChannelState::Closed;
    }

    /// Request ids are client-chosen, monotonically allocated, never reused.
    pub fn alloc_request_id(&mut self) -> u32 {
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        self.next_request_id
    }

    fn alloc_sequence_number(&mut self) -> u32 {
        self.next_sequence_number = self.next_sequence_number.wrapping_add(1).max(1);
        self.next_sequence_number
    }

    /// Is the token past the renewal threshold?
    pub fn needs_renewal(&self) -> bool {
        self.state == ChannelState::Open
            && self.pending_nonce.is_none()
            && self.token_lifetime_ms > 0
            && self.token_created.elapsed().as_millis() as f64
                >= f64::from(self.token_lifetime_ms) * RENEWAL_FRACTION
    }

    // ── OPN send path ─────────────────────────────────────────────────────────

    /// Build the OPN chunk for an Issue (first open) or Renew (token
    /// refresh). Returns the request id and the framed chunk.
    pub fn begin_open(&mut self) -> Result<(u32, BytesMut)> {
        let renewing = self.state == ChannelState::Open;
        if !renewing && self.state != ChannelState::Acknowledged {
            return Err(Error::usage("channel is not ready to open"));
        }

        let request_id = self.alloc_request_id();
        let nonce = self.policy.random_nonce();
        let request = OpenSecureChannelRequest {
            request_header: RequestHeader::new(NodeId::NULL, request_id, 0),
            client_protocol_version: PROTOCOL_VERSION,
            request_type: if renewing {
                SecurityTokenRequestType::Renew
            } else {
                SecurityTokenRequestType::Issue
            },
            security_mode: self.mode,
            client_nonce: if nonce.is_empty() {
                ByteString::NULL
            } else {
                ByteString::new(nonce.clone())
            },
            requested_lifetime: self.requested_lifetime_ms,
        };

        let sequence = SequenceHeader::new(self.alloc_sequence_number(), request_id);
        let mut plain = Vec::with_capacity(256);
        plain.extend_from_slice(sequence.as_bytes());
        let mut body = BytesMut::new();
        NodeId::numeric(0, OPEN_SECURE_CHANNEL_REQUEST_TYPE_ID).encode(&mut body);
        request.encode(&mut body);
        plain.extend_from_slice(&body);

        let header = AsymmetricSecurityHeader {
            channel_id: if renewing { self.channel_id } else { 0 },
            policy_uri: self.policy.uri().to_string(),
            sender_certificate: match &self.identity {
                Some(identity) if self.policy != SecurityPolicy::None => {
                    ByteString::new(identity.certificate.der().to_vec())
                }
                _ => ByteString::NULL,
            },
            receiver_thumbprint: match &self.remote_certificate {
                Some(remote) if self.policy != SecurityPolicy::None => {
                    ByteString::new(remote.thumbprint().to_vec())
                }
                _ => ByteString::NULL,
            },
        };
        let header_bytes = header.encode_to_vec();

        let chunk_body = if self.policy == SecurityPolicy::None {
            let mut out = header_bytes;
            out.extend_from_slice(&plain);
            out
        } else {
            padding::apply_asym(
                &mut plain,
                self.suite.asym_plain_block_size(),
                self.suite.asym_encrypt_two_byte_pad(),
            );
            let ciphertext = self.suite.asym_encrypt(&plain)?;
            let mut out = header_bytes;
            out.extend_from_slice(&ciphertext);
            let signature = self.suite.asym_sign(&out)?;
            out.extend_from_slice(&signature);
            out
        };

        self.pending_nonce = Some(nonce);
        if !renewing {
            self.state = ChannelState::Opening;
        }
        tracing::debug!(
            request_id,
            renewing,
            policy = %self.policy,
            "open secure channel request built"
        );
        Ok((
            request_id,
            frame_chunk(MessageKind::OpenChannel, ChunkKind::Final, &chunk_body),
        ))
    }

    // ── OPN receive path ──────────────────────────────────────────────────────

    /// Process an OPN response body: verify, decrypt, decode, adopt the new
    /// token and derive keys.
    pub fn process_open_response(&mut self, body: &[u8]) -> Result<ChannelSecurityToken> {
        let mut reader = BinaryReader::new(body);
        let header = AsymmetricSecurityHeader::decode(&mut reader)?;
        if header.policy_uri != self.policy.uri() {
            return Err(
                opcua_core::crypto::CryptoError::UnknownPolicy(header.policy_uri).into(),
            );
        }
        // Under policy None some servers still attach their certificate.
        if self.remote_certificate.is_none() && !header.sender_certificate.is_null() {
            self.remote_certificate =
                Some(Certificate::from_der(header.sender_certificate.as_slice())
                    .map_err(opcua_core::crypto::CryptoError::from)?);
        }

        let rest = &body[reader.position()..];
        let plain = if self.policy == SecurityPolicy::None {
            rest.to_vec()
        } else {
            let signature_length = self.suite.asym_remote_signature_length();
            if rest.len() < signature_length {
                return Err(opcua_core::crypto::CryptoError::BadSignature.into());
            }
            let (signed, signature) = body.split_at(body.len() - signature_length);
            // Verify before decrypt.
            self.suite.asym_verify(signed, signature)?;
            let ciphertext = &rest[..rest.len() - signature_length];
            let mut plain = self.suite.asym_decrypt(ciphertext)?;
            let unpadded = padding::strip_asym(
                &plain,
                self.suite.asym_decrypt_plain_block_size(),
                self.suite.asym_decrypt_two_byte_pad(),
            )?;
            plain.truncate(unpadded);
            plain
        };

        let mut reader = BinaryReader::new(&plain);
        let sequence = SequenceHeader::read_from_prefix(&plain[..])
            .ok_or(opcua_core::codec::CodecError::Truncated {
                offset: 0,
                needed: SEQUENCE_HEADER_SIZE,
            })?;
        reader.read_bytes(SEQUENCE_HEADER_SIZE)?;
        self.rx_sequence.validate(sequence.sequence_number.get())?;

        let type_id = NodeId::decode(&mut reader)?;
        match type_id.as_type_id() {
            Some(OPEN_SECURE_CHANNEL_RESPONSE_TYPE_ID) => {}
            Some(SERVICE_FAULT_TYPE_ID) => {
                let fault = ServiceFault::decode(&mut reader)?;
                return Err(Error::Service(fault.response_header.service_result));
            }
            _ => {
                return Err(opcua_core::codec::CodecError::OutOfRange {
                    field: "open response type id",
                }
                .into())
            }
        }
        let response = OpenSecureChannelResponse::decode(&mut reader)?;
        if response.response_header.service_result.is_bad() {
            return Err(Error::Service(response.response_header.service_result));
        }

        let client_nonce = self
            .pending_nonce
            .take()
            .ok_or_else(|| Error::usage("no open request in flight"))?;

        if self.policy != SecurityPolicy::None {
            let mut new_suite = self
                .policy
                .client_suite(self.identity.as_ref(), self.remote_certificate.as_ref())?;
            new_suite.derive_keys(&client_nonce, response.server_nonce.as_slice())?;
            let old_suite = std::mem::replace(&mut self.suite, new_suite);
            if self.state == ChannelState::Open {
                self.previous = Some((self.token_id, old_suite));
            }
        }

        let token = &response.security_token;
        self.channel_id = token.channel_id;
        self.token_id = token.token_id;
        self.token_created = Instant::now();
        self.token_lifetime_ms = token.revised_lifetime;
        self.rx_sequence.reset();
        self.state = ChannelState::Open;
        tracing::info!(
            channel_id = self.channel_id,
            token_id = self.token_id,
            lifetime_ms = self.token_lifetime_ms,
            "secure channel open"
        );
        Ok(response.security_token)
    }

    // ── Symmetric send path ───────────────────────────────────────────────────

    /// Largest payload slice that fits one chunk after headers, padding and
    /// signature.
    fn max_chunk_payload(&self) -> usize {
        let space = self.limits.send_buffer_size as usize
            - CHUNK_HEADER_SIZE
            - SYMMETRIC_HEADER_SIZE
            - self.sym_signature_length_for_mode();
        if self.mode.encrypts() {
            let block = self.suite.sym_block_size();
            (space / block) * block - 1 - SEQUENCE_HEADER_SIZE
        } else {
            space - SEQUENCE_HEADER_SIZE
        }
    }

    fn sym_signature_length_for_mode(&self) -> usize {
        if self.mode.signs() {
            self.suite.sym_signature_length()
        } else {
            0
        }
    }

    /// Seal `TypeId ‖ Body` into one or more MSG (or CLO) chunks.
    pub fn seal_message(
        &mut self,
        kind: MessageKind,
        request_id: u32,
        payload: &[u8],
    ) -> Result<Vec<BytesMut>> {
        if self.state != ChannelState::Open && self.state != ChannelState::Closing {
            return Err(Error::ChannelClosed);
        }

        let max_payload = self.max_chunk_payload();
        let pieces: Vec<&[u8]> = if payload.is_empty() {
            vec![&[]]
        } else {
            payload.chunks(max_payload).collect()
        };
        if !self.limits.accepts_chunk_count(pieces.len() as u32) {
            return Err(WireError::MessageTooLarge.into());
        }
        if !self.limits.accepts_message(payload.len()) {
            return Err(WireError::MessageTooLarge.into());
        }

        let mut chunks = Vec::with_capacity(pieces.len());
        let last = pieces.len() - 1;
        for (index, piece) in pieces.into_iter().enumerate() {
            let chunk_kind = if index == last {
                ChunkKind::Final
            } else {
                ChunkKind::Intermediate
            };
            chunks.push(self.seal_chunk(kind, chunk_kind, request_id, piece)?);
        }
        Ok(chunks)
    }

    fn seal_chunk(
        &mut self,
        kind: MessageKind,
        chunk_kind: ChunkKind,
        request_id: u32,
        piece: &[u8],
    ) -> Result<BytesMut> {
        let sequence = SequenceHeader::new(self.alloc_sequence_number(), request_id);
        let mut plain =
            Vec::with_capacity(SEQUENCE_HEADER_SIZE + piece.len() + self.suite.sym_block_size());
        plain.extend_from_slice(sequence.as_bytes());
        plain.extend_from_slice(piece);

        if self.mode.encrypts() {
            padding::apply(&mut plain, self.suite.sym_block_size());
        }
        let protected = if self.mode.encrypts() {
            self.suite.sym_encrypt(&plain)?
        } else {
            plain
        };

        let header = SymmetricSecurityHeader::new(self.channel_id, self.token_id);
        let mut body = Vec::with_capacity(SYMMETRIC_HEADER_SIZE + protected.len() + 32);
        body.extend_from_slice(header.as_bytes());
        body.extend_from_slice(&protected);
        if self.mode.signs() {
            let signature = self.suite.sym_sign(&body)?;
            body.extend_from_slice(&signature);
        }
        Ok(frame_chunk(kind, chunk_kind, &body))
    }

    // ── Symmetric receive path ────────────────────────────────────────────────

    /// Verify, decrypt and sequence-check one received MSG/CLO chunk.
    pub fn open_chunk(&mut self, raw: &RawChunk) -> Result<OpenedChunk> {
        let body = &raw.body;
        if body.len() < SYMMETRIC_HEADER_SIZE {
            return Err(opcua_core::codec::CodecError::Truncated {
                offset: body.len(),
                needed: SYMMETRIC_HEADER_SIZE - body.len(),
            }
            .into());
        }
        let header = SymmetricSecurityHeader::read_from_prefix(&body[..])
            .expect("length checked above");

        if header.channel_id.get() != self.channel_id {
            return Err(SequencingError::ChannelIdMismatch {
                expected: self.channel_id,
                got: header.channel_id.get(),
            }
            .into());
        }

        let token_id = header.token_id.get();
        let current_token = token_id == self.token_id;
        if !current_token && self.previous.as_ref().map(|(id, _)| *id) != Some(token_id) {
            return Err(SequencingError::UnknownTokenId(token_id).into());
        }

        let suite: &dyn CryptoSuite = if current_token {
            self.suite.as_ref()
        } else {
            &*self.previous.as_ref().expect("checked above").1
        };

        let signature_length = if self.mode.signs() {
            suite.sym_signature_length()
        } else {
            0
        };
        if body.len() < SYMMETRIC_HEADER_SIZE + signature_length {
            return Err(opcua_core::crypto::CryptoError::BadSignature.into());
        }
        let (signed, signature) = body.split_at(body.len() - signature_length);
        if self.mode.signs() {
            // Verify before decrypt.
            suite.sym_verify(signed, signature)?;
        }

        let ciphertext = &signed[SYMMETRIC_HEADER_SIZE..];
        let plain = if self.mode.encrypts() {
            let mut plain = suite.sym_decrypt(ciphertext)?;
            let unpadded = padding::strip(&plain, suite.sym_block_size())?;
            plain.truncate(unpadded);
            plain
        } else {
            ciphertext.to_vec()
        };

        if plain.len() < SEQUENCE_HEADER_SIZE {
            return Err(opcua_core::codec::CodecError::Truncated {
                offset: plain.len(),
                needed: SEQUENCE_HEADER_SIZE - plain.len(),
            }
            .into());
        }
        let sequence = SequenceHeader::read_from_prefix(&plain[..]).expect("length checked");
        self.rx_sequence.validate(sequence.sequence_number.get())?;

        // First traffic under the new token retires the old one.
        if current_token && self.previous.is_some() {
            self.previous = None;
        }

        Ok(OpenedChunk {
            request_id: sequence.request_id.get(),
            chunk: raw.chunk,
            payload: plain[SEQUENCE_HEADER_SIZE..].to_vec(),
        })
    }

    // ── Close ─────────────────────────────────────────────────────────────────

    /// Build the CLO chunk. The server does not answer it.
    pub fn build_close(&mut self) -> Result<BytesMut> {
        let request_id = self.alloc_request_id();
        let request = CloseSecureChannelRequest {
            request_header: RequestHeader::new(NodeId::NULL, request_id, 0),
        };
        let mut payload = BytesMut::new();
        NodeId::numeric(0, CLOSE_SECURE_CHANNEL_REQUEST_TYPE_ID).encode(&mut payload);
        request.encode(&mut payload);
        self.state = ChannelState::Closing;
        let mut chunks = self.seal_message(MessageKind::CloseChannel, request_id, &payload)?;
        debug_assert_eq!(chunks.len(), 1);
        Ok(chunks.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcua_core::crypto::derive::KeySizes;
    use opcua_core::types::StatusCode;

    fn none_channel() -> SecureChannel {
        let mut channel = SecureChannel::new(
            SecurityPolicy::None,
            MessageSecurityMode::None,
            None,
            None,
        )
        .unwrap();
        channel.on_hello_sent();
        channel.on_acknowledged(TransportLimits {
            receive_buffer_size: 8192,
            send_buffer_size: 8192,
            max_message_size: 0,
            max_chunk_count: 0,
        });
        channel
    }

    /// Drive a None-policy channel to Open without a server: issue the OPN
    /// and feed back a handcrafted response.
    fn opened_none_channel() -> SecureChannel {
        let mut channel = none_channel();
        let (request_id, _chunk) = channel.begin_open().unwrap();

        let response = OpenSecureChannelResponse {
            response_header: Default::default(),
            server_protocol_version: 0,
            security_token: ChannelSecurityToken {
                channel_id: 5,
                token_id: 1,
                created_at: opcua_core::types::DateTime::now(),
                revised_lifetime: 600_000,
            },
            server_nonce: ByteString::NULL,
        };
        let mut body = Vec::new();
        let header = AsymmetricSecurityHeader {
            channel_id: 5,
            policy_uri: SecurityPolicy::None.uri().into(),
            sender_certificate: ByteString::NULL,
            receiver_thumbprint: ByteString::NULL,
        };
        body.extend_from_slice(&header.encode_to_vec());
        body.extend_from_slice(SequenceHeader::new(1, request_id).as_bytes());
        let mut rest = BytesMut::new();
        NodeId::numeric(0, OPEN_SECURE_CHANNEL_RESPONSE_TYPE_ID).encode(&mut rest);
        response.encode(&mut rest);
        body.extend_from_slice(&rest);

        channel.process_open_response(&body).unwrap();
        assert!(channel.is_open());
        assert_eq!(channel.channel_id(), 5);
        channel
    }

    fn as_raw(frame: &[u8]) -> RawChunk {
        let header = opcua_core::wire::ChunkHeader::read_from_prefix(frame).unwrap();
        RawChunk {
            kind: header.message_kind().unwrap(),
            chunk: header.chunk_kind().unwrap(),
            body: bytes::Bytes::copy_from_slice(&frame[CHUNK_HEADER_SIZE..]),
        }
    }

    // ── Sequence validator ────────────────────────────────────────────────────

    #[test]
    fn validator_accepts_monotonic_streams() {
        let mut v = SequenceValidator::default();
        for seq in [51u32, 52, 53, 100, 4_000_000_000] {
            v.validate(seq).unwrap();
        }
    }

    #[test]
    fn validator_accepts_any_first_value() {
        let mut v = SequenceValidator::default();
        v.validate(4_294_967_000).unwrap();
    }

    #[test]
    fn validator_rejects_duplicates() {
        let mut v = SequenceValidator::default();
        v.validate(7).unwrap();
        assert_eq!(v.validate(7), Err(SequencingError::Duplicate(7)));
    }

    #[test]
    fn validator_permits_one_wrap_per_token() {
        let mut v = SequenceValidator::default();
        v.validate(u32::MAX - 1).unwrap();
        v.validate(u32::MAX).unwrap();
        // Wrap.
        v.validate(1).unwrap();
        v.validate(2).unwrap();
        // A second wrap is fatal.
        assert_eq!(v.validate(1), Err(SequencingError::DoubleRollover));
    }

    #[test]
    fn validator_reset_forgives_everything() {
        let mut v = SequenceValidator::default();
        v.validate(100).unwrap();
        v.validate(5).unwrap(); // wrap used
        v.reset();
        v.validate(3).unwrap();
        v.validate(1).unwrap(); // wrap available again
    }

    // ── None-policy channel flow ──────────────────────────────────────────────

    #[test]
    fn open_then_seal_then_open_chunk_round_trips() {
        let mut channel = opened_none_channel();
        let request_id = channel.alloc_request_id();
        let payload = b"\x01\x00\x77\x02some body".to_vec();
        let chunks = channel
            .seal_message(MessageKind::Message, request_id, &payload)
            .unwrap();
        assert_eq!(chunks.len(), 1);

        // The channel accepts its own chunk back (token ids match, no
        // crypto under policy None).
        let opened = channel.open_chunk(&as_raw(&chunks[0])).unwrap();
        assert_eq!(opened.request_id, request_id);
        assert_eq!(opened.payload, payload);
        assert_eq!(opened.chunk, ChunkKind::Final);
    }

    #[test]
    fn large_messages_split_into_continuation_chunks() {
        let mut channel = opened_none_channel();
        let request_id = channel.alloc_request_id();
        let payload = vec![0xabu8; 20_000];
        let chunks = channel
            .seal_message(MessageKind::Message, request_id, &payload)
            .unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 8192);
        }

        let mut assembled = Vec::new();
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.iter().enumerate() {
            let opened = channel.open_chunk(&as_raw(chunk)).unwrap();
            assert_eq!(
                opened.chunk,
                if i == last {
                    ChunkKind::Final
                } else {
                    ChunkKind::Intermediate
                }
            );
            assembled.extend_from_slice(&opened.payload);
        }
        assert_eq!(assembled, payload);
    }

    #[test]
    fn replayed_chunk_is_a_duplicate_sequence_violation() {
        let mut channel = opened_none_channel();
        let request_id = channel.alloc_request_id();
        let chunks = channel
            .seal_message(MessageKind::Message, request_id, b"once")
            .unwrap();
        let raw = as_raw(&chunks[0]);
        channel.open_chunk(&raw).unwrap();
        let err = channel.open_chunk(&raw).unwrap_err();
        assert!(matches!(
            err,
            Error::Sequencing(SequencingError::Duplicate(_))
        ));
    }

    #[test]
    fn chunk_for_wrong_channel_is_rejected() {
        let mut channel = opened_none_channel();
        let request_id = channel.alloc_request_id();
        let chunks = channel
            .seal_message(MessageKind::Message, request_id, b"x")
            .unwrap();
        let mut frame = chunks[0].to_vec();
        // Corrupt the channel id inside the symmetric header.
        frame[CHUNK_HEADER_SIZE] ^= 0xff;
        let err = channel.open_chunk(&as_raw(&frame)).unwrap_err();
        assert!(matches!(
            err,
            Error::Sequencing(SequencingError::ChannelIdMismatch { .. })
        ));
    }

    #[test]
    fn chunk_with_unknown_token_is_rejected() {
        let mut channel = opened_none_channel();
        let request_id = channel.alloc_request_id();
        let chunks = channel
            .seal_message(MessageKind::Message, request_id, b"x")
            .unwrap();
        let mut frame = chunks[0].to_vec();
        // Token id sits after the channel id.
        frame[CHUNK_HEADER_SIZE + 4] ^= 0x55;
        let err = channel.open_chunk(&as_raw(&frame)).unwrap_err();
        assert!(matches!(
            err,
            Error::Sequencing(SequencingError::UnknownTokenId(_))
        ));
    }

    #[test]
    fn sealing_on_a_closed_channel_fails() {
        let mut channel = none_channel();
        let err = channel
            .seal_message(MessageKind::Message, 1, b"x")
            .unwrap_err();
        assert!(matches!(err, Error::ChannelClosed));
    }

    #[test]
    fn open_response_service_fault_is_surfaced() {
        let mut channel = none_channel();
        let (request_id, _) = channel.begin_open().unwrap();

        let fault = ServiceFault {
            response_header: opcua_core::types::ResponseHeader {
                service_result: StatusCode::BAD_SECURITY_CHECKS_FAILED,
                ..Default::default()
            },
        };
        let header = AsymmetricSecurityHeader {
            channel_id: 0,
            policy_uri: SecurityPolicy::None.uri().into(),
            sender_certificate: ByteString::NULL,
            receiver_thumbprint: ByteString::NULL,
        };
        let mut body = header.encode_to_vec();
        body.extend_from_slice(SequenceHeader::new(1, request_id).as_bytes());
        let mut rest = BytesMut::new();
        NodeId::numeric(0, SERVICE_FAULT_TYPE_ID).encode(&mut rest);
        fault.encode(&mut rest);
        body.extend_from_slice(&rest);

        let err = channel.process_open_response(&body).unwrap_err();
        assert_eq!(
            err.status_code(),
            Some(StatusCode::BAD_SECURITY_CHECKS_FAILED)
        );
    }

    #[test]
    fn open_response_with_wrong_policy_is_rejected() {
        let mut channel = none_channel();
        let (_, _) = channel.begin_open().unwrap();
        let header = AsymmetricSecurityHeader {
            channel_id: 0,
            policy_uri: "http://opcfoundation.org/UA/SecurityPolicy#Basic128".into(),
            sender_certificate: ByteString::NULL,
            receiver_thumbprint: ByteString::NULL,
        };
        let err = channel
            .process_open_response(&header.encode_to_vec())
            .unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }

    #[test]
    fn renewal_threshold() {
        let channel = opened_none_channel();
        // Fresh token, 600 s lifetime: renewal is not due.
        assert!(!channel.needs_renewal());
    }

    #[test]
    fn key_sizes_match_policy() {
        assert_eq!(
            SecurityPolicy::Basic256Sha256.key_sizes(),
            KeySizes {
                signing_key: 32,
                encryption_key: 32,
                iv: 16
            }
        );
    }
}
