//! Drives the UACP handshake over an async byte stream and then carries
//! secure channel chunks.
//!
//! Every constructor returns only once the connection is `Open`. A failed
//! handshake has already told the peer why (when there was anything to say)
//! by the time the error is returned.

use crate::config::{ClientConfig, ServerConfig};
use crate::core::codec::UacpCodec;
use crate::core::primitives::UaString;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::{Handshake, Step, TransportLimits};
use crate::protocol::message::{Generic, Message, HEADER_SIZE};
use crate::protocol::status::StatusCode;
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::{with_timeout_error, DEFAULT_TIMEOUT};

use futures::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, instrument, warn};

/// An open UACP connection.
pub struct UacpConnection<S> {
    framed: Framed<S, UacpCodec>,
    handshake: Handshake,
    limits: TransportLimits,
    outgoing: MessageBudget,
    incoming: MessageBudget,
    send_timeout: Duration,
    recv_timeout: Option<Duration>,
}

impl<S> std::fmt::Debug for UacpConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UacpConnection")
            .field("role", &self.handshake.role())
            .field("state", &self.handshake.state())
            .field("limits", &self.limits)
            .finish()
    }
}

impl<S> UacpConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Client side: send Hello and wait for the Acknowledge.
    #[instrument(skip(stream, config), fields(endpoint_url = %config.endpoint_url))]
    pub async fn connect(stream: S, config: &ClientConfig) -> Result<Self> {
        let mut handshake = Handshake::client(config);
        let mut framed = Framed::new(
            stream,
            UacpCodec::new(config.receive_buffer_size, config.send_buffer_size),
        );
        let hello = handshake.start()?;
        framed.send(hello).await?;
        let incoming = MessageBudget::new(config.max_message_size, config.max_chunk_count);
        Self::establish(framed, handshake, incoming, config.handshake_timeout).await
    }

    /// Server side: wait for Hello and answer it.
    #[instrument(skip(stream, config), fields(server_uri = %config.server_uri))]
    pub async fn accept(stream: S, config: &ServerConfig) -> Result<Self> {
        let handshake = Handshake::server(config);
        let framed = Framed::new(
            stream,
            UacpCodec::new(config.receive_buffer_size, config.send_buffer_size),
        );
        let incoming = MessageBudget::new(config.max_message_size, config.max_chunk_count);
        Self::establish(framed, handshake, incoming, config.handshake_timeout).await
    }

    /// Server side of a reverse connection: announce with ReverseHello, then wait for Hello.
    #[instrument(skip(stream, config), fields(server_uri = %config.server_uri))]
    pub async fn reverse_connect(stream: S, config: &ServerConfig) -> Result<Self> {
        let mut handshake = Handshake::server(config);
        let mut framed = Framed::new(
            stream,
            UacpCodec::new(config.receive_buffer_size, config.send_buffer_size),
        );
        let reverse = handshake.start_reverse()?;
        framed.send(reverse).await?;
        let incoming = MessageBudget::new(config.max_message_size, config.max_chunk_count);
        Self::establish(framed, handshake, incoming, config.handshake_timeout).await
    }

    /// Client side of a reverse connection: wait for ReverseHello, answer with Hello.
    #[instrument(skip(stream, config))]
    pub async fn accept_reverse(stream: S, config: &ClientConfig) -> Result<Self> {
        let handshake = Handshake::client(config);
        let framed = Framed::new(
            stream,
            UacpCodec::new(config.receive_buffer_size, config.send_buffer_size),
        );
        let incoming = MessageBudget::new(config.max_message_size, config.max_chunk_count);
        Self::establish(framed, handshake, incoming, config.handshake_timeout).await
    }

    async fn establish(
        mut framed: Framed<S, UacpCodec>,
        mut handshake: Handshake,
        incoming: MessageBudget,
        timeout: Duration,
    ) -> Result<Self> {
        let started = Instant::now();

        let outcome =
            with_timeout_error(drive_handshake(&mut framed, &mut handshake), timeout).await;

        match outcome {
            Ok(limits) => {
                framed.codec_mut().apply_limits(&limits);
                global_metrics().handshake_duration(started.elapsed());
                global_metrics().connection_opened();
                Ok(Self {
                    framed,
                    handshake,
                    outgoing: MessageBudget::new(limits.max_message_size, limits.max_chunk_count),
                    incoming,
                    limits,
                    send_timeout: DEFAULT_TIMEOUT,
                    recv_timeout: None,
                })
            }
            Err(err) => {
                global_metrics().transport_error();
                if matches!(err, ProtocolError::Timeout) {
                    warn!(timeout_ms = timeout.as_millis(), "Handshake timed out");
                    global_metrics().handshake_rejected();
                    if let Some(reply) =
                        handshake.close(StatusCode::BAD_TIMEOUT, "Handshake timed out")
                    {
                        send_best_effort(&mut framed, reply).await;
                    }
                }
                Err(err)
            }
        }
    }

    /// Set custom timeout durations. `None` waits for the next chunk indefinitely.
    pub fn with_timeouts(mut self, send_timeout: Duration, recv_timeout: Option<Duration>) -> Self {
        self.send_timeout = send_timeout;
        self.recv_timeout = recv_timeout;
        self
    }

    /// Limits negotiated by the handshake, from this side's view.
    pub fn limits(&self) -> &TransportLimits {
        &self.limits
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Endpoint URL the client asked for (server side only).
    pub fn peer_endpoint_url(&self) -> Option<&UaString> {
        self.handshake.peer_endpoint_url()
    }

    pub fn get_ref(&self) -> &S {
        self.framed.get_ref()
    }

    /// Send one secure channel chunk.
    ///
    /// # Errors
    /// `MessageTooLarge` if the chunk exceeds the peer's receive buffer or the
    /// message it belongs to would exceed the peer's maximum message size. A
    /// `BadTcpMessageTooLarge` violation if the message would need more chunks
    /// than the peer accepts. Nothing is sent in either case; an abort chunk
    /// is still accepted afterwards.
    #[instrument(skip(self, chunk), level = "debug", fields(len = chunk.payload.len()))]
    pub async fn send_chunk(&mut self, chunk: Generic) -> Result<()> {
        if !self.handshake.is_open() {
            return Err(ProtocolError::violation(
                StatusCode::BAD_SECURE_CHANNEL_CLOSED,
                constants::ERR_NOT_OPEN,
            ));
        }
        let size = HEADER_SIZE + chunk.payload.len();
        let max = self.limits.send_buffer_size as usize;
        if size > max {
            debug!(size, max, "{}", constants::ERR_CHUNK_TOO_LARGE);
            return Err(ProtocolError::MessageTooLarge { size, max });
        }
        self.outgoing.admit(&chunk)?;
        let message = Message::Generic(chunk);

        let framed = &mut self.framed;
        with_timeout_error(
            async {
                framed.send(message).await?;
                Ok(())
            },
            self.send_timeout,
        )
        .await
    }

    /// Receive the next secure channel chunk.
    ///
    /// An Error from the peer surfaces as `RemoteError`. A malformed frame is
    /// answered with an Error and closes the connection.
    #[instrument(skip(self), level = "debug")]
    pub async fn recv_chunk(&mut self) -> Result<Generic> {
        if self.handshake.is_finished() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let next = match self.recv_timeout {
            Some(timeout) => with_timeout_error(
                async { Ok(self.framed.next().await) },
                timeout,
            )
            .await?,
            None => self.framed.next().await,
        };

        let step = match next {
            None => {
                let _ = self
                    .handshake
                    .close(StatusCode::BAD_SECURE_CHANNEL_CLOSED, "Stream ended");
                return Err(ProtocolError::ConnectionClosed);
            }
            Some(Err(err)) => self.handshake.fail(err),
            Some(Ok(message)) => self.handshake.receive(message),
        };

        match step {
            Step::Forward(chunk) => match self.incoming.admit(&chunk) {
                Ok(()) => Ok(chunk),
                Err(error) => {
                    warn!(error = %error, "Peer exceeded message limits");
                    if let Some(reply) = self.handshake.close(error.status_code(), &error.to_string())
                    {
                        send_best_effort(&mut self.framed, reply).await;
                    }
                    Err(error)
                }
            },
            Step::Closed { reply, error } => {
                if let Some(reply) = reply {
                    send_best_effort(&mut self.framed, reply).await;
                }
                Err(error)
            }
            Step::Send(_) | Step::Opened { .. } => Err(ProtocolError::UnexpectedMessage),
        }
    }

    /// Route incoming chunks through `dispatcher` until the peer goes away.
    ///
    /// Returns `Ok(())` when the stream ends. A handler failure closes the
    /// connection with the matching status code.
    #[instrument(skip(self, dispatcher))]
    pub async fn serve(&mut self, dispatcher: &Dispatcher) -> Result<()> {
        loop {
            let chunk = match self.recv_chunk().await {
                Ok(chunk) => chunk,
                Err(ProtocolError::ConnectionClosed) => return Ok(()),
                Err(err) => return Err(err),
            };

            match dispatcher.dispatch(&chunk) {
                Ok(Some(reply)) => self.send_chunk(reply).await?,
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, "Chunk handler failed");
                    if let Some(reply) = self.handshake.close(err.status_code(), &err.to_string())
                    {
                        send_best_effort(&mut self.framed, reply).await;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Tell the peer why the connection ends and shut the stream down.
    #[instrument(skip(self, reason))]
    pub async fn close(mut self, code: StatusCode, reason: &str) -> Result<()> {
        if let Some(reply) = self.handshake.close(code, reason) {
            self.framed.send(reply).await?;
        }
        self.framed.close().await
    }
}

impl<S> Drop for UacpConnection<S> {
    fn drop(&mut self) {
        global_metrics().connection_dropped();
    }
}

async fn drive_handshake<S>(
    framed: &mut Framed<S, UacpCodec>,
    handshake: &mut Handshake,
) -> Result<TransportLimits>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let step = match framed.next().await {
            None => return Err(ProtocolError::ConnectionClosed),
            Some(Err(err)) => handshake.fail(err),
            Some(Ok(message)) => {
                debug!(message = message.name(), "Handshake message received");
                handshake.receive(message)
            }
        };

        match step {
            Step::Send(message) => framed.send(message).await?,
            Step::Opened { reply, limits } => {
                if let Some(reply) = reply {
                    framed.send(reply).await?;
                }
                return Ok(limits);
            }
            Step::Closed { reply, error } => {
                if let Some(reply) = reply {
                    send_best_effort(framed, reply).await;
                }
                return Err(error);
            }
            Step::Forward(_) => return Err(ProtocolError::UnexpectedMessage),
        }
    }
}

/// Send a closing Error. The connection is going away either way, so a failed
/// write is only logged.
async fn send_best_effort<S>(framed: &mut Framed<S, UacpCodec>, reply: Message)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(err) = framed.send(reply).await {
        debug!(error = %err, "Could not deliver Error message");
    }
}

/// Chunk count and body bytes of the message in flight in one direction.
///
/// Both maxima use 0 for no limit. Final and abort chunks end the message.
#[derive(Debug, Clone, Copy)]
struct MessageBudget {
    max_message_size: u32,
    max_chunk_count: u32,
    chunks: u32,
    bytes: usize,
}

impl MessageBudget {
    fn new(max_message_size: u32, max_chunk_count: u32) -> Self {
        Self {
            max_message_size,
            max_chunk_count,
            chunks: 0,
            bytes: 0,
        }
    }

    /// Account for `chunk`, leaving the budget untouched if it does not fit.
    fn admit(&mut self, chunk: &Generic) -> Result<()> {
        if chunk.is_abort() {
            self.reset();
            return Ok(());
        }

        let chunks = self.chunks.saturating_add(1);
        let bytes = self.bytes.saturating_add(chunk.payload.len());
        if self.max_chunk_count != 0 && chunks > self.max_chunk_count {
            return Err(ProtocolError::violation(
                StatusCode::BAD_TCP_MESSAGE_TOO_LARGE,
                constants::ERR_TOO_MANY_CHUNKS,
            ));
        }
        let max = self.max_message_size as usize;
        if max != 0 && bytes > max {
            return Err(ProtocolError::MessageTooLarge { size: bytes, max });
        }

        if chunk.is_final() {
            self.reset();
        } else {
            self.chunks = chunks;
            self.bytes = bytes;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.chunks = 0;
        self.bytes = 0;
    }
}
