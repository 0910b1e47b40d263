//! The socket-owning tasks.
//!
//! One task owns the secure channel and the write half; a second owns the
//! read half and does nothing but frame chunks into an mpsc queue, so no
//! partially-read chunk can ever be lost to `select!` cancellation. Callers
//! hand encoded payloads over a command queue and get the matched response
//! back through a oneshot, keyed by the channel-allocated request id. That
//! is what lets Publish requests pipeline against ordinary service calls.
//! The channel task also runs the token-renewal timer and sends the
//! best-effort CLO when the last handle goes away.

use std::collections::HashMap;
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::{mpsc, oneshot};

use opcua_core::wire::{ChunkKind, MessageKind, WireError};

use crate::channel::SecureChannel;
use crate::error::{Error, Result};
use crate::transport::{decode_error_chunk, RawChunk, Transport, TransportWriter};

/// How often the renewal deadline is checked.
const RENEWAL_CHECK_INTERVAL: Duration = Duration::from_secs(5);

const COMMAND_QUEUE_DEPTH: usize = 32;
const CHUNK_QUEUE_DEPTH: usize = 8;

pub(crate) enum Command {
    /// Send `TypeId ‖ Body`, reply with the assembled response payload.
    Call {
        payload: BytesMut,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    },
    /// Graceful close: CLO is sent, then the task exits.
    Shutdown { reply: oneshot::Sender<()> },
}

#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
}

impl ConnectionHandle {
    /// One service round-trip. A timeout abandons the waiter; any late
    /// response is dropped by the task when the oneshot is gone.
    pub async fn call_raw(&self, payload: BytesMut, timeout: Duration) -> Result<Vec<u8>> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Call { payload, reply })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        match tokio::time::timeout(timeout, response).await {
            Err(_) => Err(Error::Timeout),
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Ok(Ok(result)) => result,
        }
    }

    /// Ask the task to send CLO and stop. Waits for the task to confirm.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self
            .commands
            .send(Command::Shutdown { reply })
            .await
            .is_ok()
        {
            let _ = done.await;
        }
    }
}

/// In-flight multi-chunk message being reassembled.
#[derive(Default)]
struct Assembly {
    payload: Vec<u8>,
    chunk_count: u32,
}

pub(crate) struct Connection {
    writer: TransportWriter,
    chunks: mpsc::Receiver<Result<RawChunk>>,
    channel: SecureChannel,
    commands: mpsc::Receiver<Command>,
    pending: HashMap<u32, oneshot::Sender<Result<Vec<u8>>>>,
    assembling: HashMap<u32, Assembly>,
}

impl Connection {
    /// Take ownership of an opened transport + channel and start the tasks.
    pub fn spawn(transport: Transport, channel: SecureChannel) -> ConnectionHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);
        let (mut reader, writer) = transport.into_split();

        let limits = *channel.limits();
        tokio::spawn(async move {
            loop {
                let received = reader.receive_chunk(&limits).await;
                let failed = received.is_err();
                if chunk_tx.send(received).await.is_err() || failed {
                    return;
                }
            }
        });

        let connection = Connection {
            writer,
            chunks: chunk_rx,
            channel,
            commands: command_rx,
            pending: HashMap::new(),
            assembling: HashMap::new(),
        };
        tokio::spawn(connection.run());
        ConnectionHandle {
            commands: command_tx,
        }
    }

    async fn run(mut self) {
        let mut renewal = tokio::time::interval(RENEWAL_CHECK_INTERVAL);
        renewal.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Call { payload, reply }) => {
                        if let Err(e) = self.send_request(payload, reply).await {
                            self.fail_all(&e);
                            return;
                        }
                    }
                    Some(Command::Shutdown { reply }) => {
                        self.close_channel().await;
                        let _ = reply.send(());
                        return;
                    }
                    // Every handle dropped: best-effort CLO, then stop.
                    None => {
                        self.close_channel().await;
                        return;
                    }
                },

                received = self.chunks.recv() => {
                    let raw = match received {
                        Some(Ok(raw)) => raw,
                        Some(Err(e)) => {
                            self.fail_all(&e);
                            return;
                        }
                        None => {
                            self.fail_all(&Error::ChannelClosed);
                            return;
                        }
                    };
                    if let Err(e) = self.handle_chunk(raw) {
                        if e.is_fatal_for_channel() {
                            self.fail_all(&e);
                            return;
                        }
                        tracing::warn!(error = %e, "chunk dropped");
                    }
                }

                _ = renewal.tick() => {
                    if self.channel.needs_renewal() {
                        if let Err(e) = self.send_renewal().await {
                            self.fail_all(&e);
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn send_request(
        &mut self,
        payload: BytesMut,
        reply: oneshot::Sender<Result<Vec<u8>>>,
    ) -> Result<()> {
        let request_id = self.channel.alloc_request_id();
        let chunks = match self
            .channel
            .seal_message(MessageKind::Message, request_id, &payload)
        {
            Ok(chunks) => chunks,
            // Oversized or mis-encoded requests fail only their caller.
            Err(e) => {
                let _ = reply.send(Err(e));
                return Ok(());
            }
        };
        self.pending.insert(request_id, reply);
        for chunk in chunks {
            self.writer.send(&chunk).await?;
        }
        tracing::trace!(request_id, "request sent");
        Ok(())
    }

    async fn send_renewal(&mut self) -> Result<()> {
        let (request_id, chunk) = self.channel.begin_open()?;
        self.writer.send(&chunk).await?;
        tracing::debug!(request_id, "token renewal requested");
        Ok(())
    }

    fn handle_chunk(&mut self, raw: RawChunk) -> Result<()> {
        match raw.kind {
            MessageKind::Error => Err(decode_error_chunk(&raw.body)),
            MessageKind::OpenChannel => {
                // Only renewals arrive here; the initial OPN response is
                // consumed before the task starts.
                self.channel.process_open_response(&raw.body)?;
                Ok(())
            }
            MessageKind::Message => {
                let opened = self.channel.open_chunk(&raw)?;
                self.route_chunk(opened.request_id, opened.chunk, opened.payload)
            }
            kind => Err(WireError::UnknownMessageType(kind.code()).into()),
        }
    }

    fn route_chunk(&mut self, request_id: u32, chunk: ChunkKind, payload: Vec<u8>) -> Result<()> {
        match chunk {
            ChunkKind::Abort => {
                self.assembling.remove(&request_id);
                if let Some(reply) = self.pending.remove(&request_id) {
                    let _ = reply.send(Err(decode_error_chunk(&payload)));
                }
                Ok(())
            }
            ChunkKind::Intermediate => {
                let limits = *self.channel.limits();
                let assembly = self.assembling.entry(request_id).or_default();
                assembly.chunk_count += 1;
                assembly.payload.extend_from_slice(&payload);
                if !limits.accepts_chunk_count(assembly.chunk_count)
                    || !limits.accepts_message(assembly.payload.len())
                {
                    return Err(WireError::MessageTooLarge.into());
                }
                Ok(())
            }
            ChunkKind::Final => {
                let mut assembly = self.assembling.remove(&request_id).unwrap_or_default();
                assembly.payload.extend_from_slice(&payload);
                if !self.channel.limits().accepts_message(assembly.payload.len()) {
                    return Err(WireError::MessageTooLarge.into());
                }
                match self.pending.remove(&request_id) {
                    Some(reply) => {
                        // A closed receiver means the caller timed out; the
                        // late response is dropped on the floor.
                        let _ = reply.send(Ok(assembly.payload));
                    }
                    None => {
                        tracing::debug!(request_id, "response for abandoned request dropped");
                    }
                }
                Ok(())
            }
        }
    }

    /// Best-effort CLO; network failure during teardown is swallowed after
    /// one attempt.
    async fn close_channel(&mut self) {
        if self.channel.is_open() {
            match self.channel.build_close() {
                Ok(chunk) => {
                    if let Err(e) = self.writer.send(&chunk).await {
                        tracing::debug!(error = %e, "close chunk not delivered");
                    }
                }
                Err(e) => tracing::debug!(error = %e, "close chunk not built"),
            }
        }
        self.channel.mark_closed();
        self.fail_all(&Error::ChannelClosed);
    }

    fn fail_all(&mut self, cause: &Error) {
        if !self.pending.is_empty() {
            tracing::warn!(
                outstanding = self.pending.len(),
                error = %cause,
                "channel terminated, cancelling outstanding requests"
            );
        }
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(Error::ChannelClosed));
        }
        self.assembling.clear();
        self.channel.mark_closed();
    }
}

/// One synchronous request/response round-trip over a not-yet-spawned
/// connection. Used during connect, before the tasks own the socket.
pub(crate) async fn call_before_spawn(
    transport: &mut Transport,
    channel: &mut SecureChannel,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let request_id = channel.alloc_request_id();
    let chunks = channel.seal_message(MessageKind::Message, request_id, payload)?;
    for chunk in chunks {
        transport.send(&chunk).await?;
    }

    let mut assembled = Vec::new();
    loop {
        let limits = *channel.limits();
        let raw = transport.receive_chunk(&limits).await?;
        match raw.kind {
            MessageKind::Error => return Err(decode_error_chunk(&raw.body)),
            MessageKind::Message => {
                let opened = channel.open_chunk(&raw)?;
                // Exactly one request is outstanding here; anything else on
                // the wire is a protocol violation.
                if opened.request_id != request_id {
                    return Err(
                        crate::error::SequencingError::UnknownRequestId(opened.request_id).into(),
                    );
                }
                match opened.chunk {
                    ChunkKind::Abort => return Err(decode_error_chunk(&opened.payload)),
                    ChunkKind::Intermediate => assembled.extend_from_slice(&opened.payload),
                    ChunkKind::Final => {
                        assembled.extend_from_slice(&opened.payload);
                        return Ok(assembled);
                    }
                }
            }
            kind => return Err(WireError::UnknownMessageType(kind.code()).into()),
        }
    }
}
