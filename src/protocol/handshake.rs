//! UACP connection handshake (Hello / Acknowledge / Error / ReverseHello).
//!
//! The state machine is per-connection and owns no I/O. Feed it every decoded
//! message in arrival order through [`Handshake::receive`]; each call yields a
//! [`Step`] telling the caller what to send, what to forward to the secure
//! channel, and whether the connection has opened or closed.
//!
//! ```text
//!            client: start() ──► AwaitingAcknowledge ──ACK──► Open
//! Closed ──┤
//!            server: HEL ──► validate ──► ACK ──────────────► Open
//!            server: start_reverse() ──► AwaitingHello ──HEL─► Open
//!
//! any state ── ERR / violation / fail() / close() ──► Closed (finished)
//! ```
//!
//! State is scoped to one `Handshake` value per connection, so concurrent
//! connections never share handshake state.

use crate::config::{ClientConfig, ServerConfig};
use crate::core::primitives::UaString;
use crate::error::{constants, ProtocolError};
use crate::protocol::message::{Acknowledge, ErrorMessage, Generic, Hello, Message, ReverseHello};
use crate::protocol::status::StatusCode;
use crate::utils::metrics::global_metrics;

#[allow(unused_imports)]
use tracing::{debug, info, instrument, warn};

/// Smallest receive/send buffer a peer may announce.
pub const MIN_BUFFER_SIZE: u32 = 8192;

/// Longest endpoint URL accepted in a Hello.
pub const MAX_ENDPOINT_URL_LENGTH: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Closed,
    AwaitingAcknowledge,
    AwaitingHello,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Limits in force once the connection is open, from the local side's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLimits {
    pub protocol_version: u32,
    /// Largest chunk this side may send.
    pub send_buffer_size: u32,
    /// Largest chunk this side accepts.
    pub receive_buffer_size: u32,
    /// Largest message the peer accepts. 0 means no limit.
    pub max_message_size: u32,
    /// Most chunks per message the peer accepts. 0 means no limit.
    pub max_chunk_count: u32,
}

/// Outcome of feeding one message into the handshake.
#[derive(Debug)]
pub enum Step {
    /// Send this message; the handshake advanced.
    Send(Message),
    /// The connection is open. Send `reply` first if present.
    Opened {
        reply: Option<Message>,
        limits: TransportLimits,
    },
    /// Secure channel traffic to hand over unmodified.
    Forward(Generic),
    /// The connection is closed. Send `reply` first if present, then drop the transport.
    Closed {
        reply: Option<Message>,
        error: ProtocolError,
    },
}

#[derive(Debug, Clone)]
enum Side {
    Client(ClientConfig),
    Server(ServerConfig),
}

/// Per-connection handshake state machine.
#[derive(Debug)]
pub struct Handshake {
    side: Side,
    state: HandshakeState,
    finished: bool,
    sent_hello: Option<Hello>,
    limits: Option<TransportLimits>,
    peer_server_uri: Option<UaString>,
    peer_endpoint_url: Option<UaString>,
}

impl Handshake {
    /// Handshake for the side that sends Hello.
    pub fn client(config: &ClientConfig) -> Self {
        Self::with_side(Side::Client(config.clone()))
    }

    /// Handshake for the side that answers Hello.
    pub fn server(config: &ServerConfig) -> Self {
        Self::with_side(Side::Server(config.clone()))
    }

    fn with_side(side: Side) -> Self {
        Self {
            side,
            state: HandshakeState::Closed,
            finished: false,
            sent_hello: None,
            limits: None,
            peer_server_uri: None,
            peer_endpoint_url: None,
        }
    }

    pub fn role(&self) -> Role {
        match self.side {
            Side::Client(_) => Role::Client,
            Side::Server(_) => Role::Server,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == HandshakeState::Open
    }

    /// True once the connection went through `Closed` after starting.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Negotiated limits, available once open.
    pub fn limits(&self) -> Option<&TransportLimits> {
        self.limits.as_ref()
    }

    /// Server URI announced by a ReverseHello.
    pub fn peer_server_uri(&self) -> Option<&UaString> {
        self.peer_server_uri.as_ref()
    }

    /// Endpoint URL the client asked for in its Hello.
    pub fn peer_endpoint_url(&self) -> Option<&UaString> {
        self.peer_endpoint_url.as_ref()
    }

    /// Client: produce the Hello and wait for the Acknowledge.
    ///
    /// # Errors
    /// Returns `ProtocolViolation` when called on a server or after the handshake began.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> Result<Message, ProtocolError> {
        let config = match &self.side {
            Side::Client(config) => config.clone(),
            Side::Server(_) => {
                return Err(ProtocolError::violation(
                    StatusCode::BAD_TCP_INTERNAL_ERROR,
                    constants::ERR_CLIENT_ROLE_ONLY,
                ))
            }
        };
        self.ensure_closed()?;
        Ok(self.send_hello(&config, UaString::from(config.endpoint_url.as_str())))
    }

    /// Server: produce the ReverseHello for a connection this side initiated.
    ///
    /// # Errors
    /// Returns `ProtocolViolation` when called on a client or after the handshake began.
    #[instrument(skip(self))]
    pub fn start_reverse(&mut self) -> Result<Message, ProtocolError> {
        let config = match &self.side {
            Side::Server(config) => config,
            Side::Client(_) => {
                return Err(ProtocolError::violation(
                    StatusCode::BAD_TCP_INTERNAL_ERROR,
                    constants::ERR_SERVER_ROLE_ONLY,
                ))
            }
        };
        let reverse = ReverseHello::new(config.server_uri.as_str(), config.endpoint_url.as_str());
        self.ensure_closed()?;
        global_metrics().handshake_started();
        self.state = HandshakeState::AwaitingHello;
        debug!(server_uri = %reverse.server_uri, "Sending ReverseHello");
        Ok(Message::ReverseHello(reverse))
    }

    /// Advance the handshake with a message received from the peer.
    pub fn receive(&mut self, msg: Message) -> Step {
        if self.finished {
            return Step::Closed {
                reply: None,
                error: ProtocolError::ConnectionClosed,
            };
        }

        match (self.state, msg) {
            (_, Message::Error(err)) => self.on_remote_error(err),
            (HandshakeState::Open, Message::Generic(chunk)) => Step::Forward(chunk),
            (HandshakeState::Closed, Message::ReverseHello(reverse))
                if self.role() == Role::Client =>
            {
                self.on_reverse_hello(reverse)
            }
            (HandshakeState::AwaitingAcknowledge, Message::Acknowledge(ack)) => {
                self.on_acknowledge(ack)
            }
            (HandshakeState::Closed | HandshakeState::AwaitingHello, Message::Hello(hello))
                if self.role() == Role::Server =>
            {
                self.on_hello(hello)
            }
            (state, other) => {
                let detail = match other {
                    Message::Hello(_) => constants::ERR_UNEXPECTED_HELLO,
                    Message::Acknowledge(_) => constants::ERR_UNEXPECTED_ACKNOWLEDGE,
                    Message::ReverseHello(_) => constants::ERR_UNEXPECTED_REVERSE_HELLO,
                    _ => constants::ERR_UNEXPECTED_CHUNK,
                };
                warn!(?state, message = other.name(), "Message illegal in current state");
                self.reject(StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID, detail)
            }
        }
    }

    /// Report a decoding or framing failure; the peer is told and the connection closes.
    pub fn fail(&mut self, error: ProtocolError) -> Step {
        if self.finished {
            return Step::Closed { reply: None, error };
        }
        warn!(error = %error, "Closing connection after failure");
        global_metrics().violation();
        let reply = ErrorMessage::new(error.status_code(), error.to_string());
        self.finish();
        Step::Closed {
            reply: Some(Message::Error(reply)),
            error,
        }
    }

    /// Close locally. Returns the Error to send, or `None` if already finished.
    pub fn close(&mut self, code: StatusCode, reason: &str) -> Option<Message> {
        if self.finished {
            return None;
        }
        debug!(%code, reason, "Closing connection");
        self.finish();
        Some(Message::Error(ErrorMessage::new(code, reason)))
    }

    fn client_config(&self) -> Option<ClientConfig> {
        match &self.side {
            Side::Client(config) => Some(config.clone()),
            Side::Server(_) => None,
        }
    }

    fn server_config(&self) -> Option<ServerConfig> {
        match &self.side {
            Side::Server(config) => Some(config.clone()),
            Side::Client(_) => None,
        }
    }

    fn ensure_closed(&self) -> Result<(), ProtocolError> {
        if self.finished || self.state != HandshakeState::Closed {
            return Err(ProtocolError::violation(
                StatusCode::BAD_TCP_INTERNAL_ERROR,
                constants::ERR_ALREADY_STARTED,
            ));
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.state = HandshakeState::Closed;
        self.finished = true;
    }

    fn send_hello(&mut self, config: &ClientConfig, endpoint_url: UaString) -> Message {
        let hello = Hello {
            version: config.protocol_version,
            receive_buffer_size: config.receive_buffer_size,
            send_buffer_size: config.send_buffer_size,
            max_message_size: config.max_message_size,
            max_chunk_count: config.max_chunk_count,
            endpoint_url,
        };
        global_metrics().handshake_started();
        debug!(endpoint_url = %hello.endpoint_url, "Sending Hello");
        self.sent_hello = Some(hello.clone());
        self.state = HandshakeState::AwaitingAcknowledge;
        Message::Hello(hello)
    }

    fn reject(&mut self, status: StatusCode, detail: &str) -> Step {
        global_metrics().violation();
        if self.state != HandshakeState::Open {
            global_metrics().handshake_rejected();
        }
        self.finish();
        Step::Closed {
            reply: Some(Message::Error(ErrorMessage::new(status, detail))),
            error: ProtocolError::violation(status, detail),
        }
    }

    fn on_remote_error(&mut self, err: ErrorMessage) -> Step {
        warn!(code = %err.code, reason = %err.reason, "Peer reported error");
        global_metrics().peer_error();
        if self.state != HandshakeState::Open {
            global_metrics().handshake_rejected();
        }
        self.finish();
        Step::Closed {
            reply: None,
            error: ProtocolError::RemoteError {
                code: err.code,
                reason: err.reason.to_string(),
            },
        }
    }

    fn on_reverse_hello(&mut self, reverse: ReverseHello) -> Step {
        let Some(config) = self.client_config() else {
            return self.reject(
                StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID,
                constants::ERR_UNEXPECTED_REVERSE_HELLO,
            );
        };
        debug!(server_uri = %reverse.server_uri, "Received ReverseHello");

        let endpoint_url = if config.endpoint_url.is_empty() {
            reverse.endpoint_url
        } else {
            UaString::from(config.endpoint_url.as_str())
        };
        self.peer_server_uri = Some(reverse.server_uri);
        Step::Send(self.send_hello(&config, endpoint_url))
    }

    fn on_acknowledge(&mut self, ack: Acknowledge) -> Step {
        let requested = self
            .sent_hello
            .as_ref()
            .map(|hello| (hello.send_buffer_size, hello.receive_buffer_size));
        let Some((requested_send, requested_receive)) = requested else {
            return self.reject(
                StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID,
                constants::ERR_UNEXPECTED_ACKNOWLEDGE,
            );
        };

        if ack.receive_buffer_size > requested_send || ack.send_buffer_size > requested_receive {
            warn!(?ack, "Revised buffer sizes exceed the requested sizes");
            return self.reject(
                StatusCode::BAD_TCP_INTERNAL_ERROR,
                constants::ERR_REVISED_BUFFER_TOO_LARGE,
            );
        }
        if ack.receive_buffer_size < MIN_BUFFER_SIZE || ack.send_buffer_size < MIN_BUFFER_SIZE {
            return self.reject(
                StatusCode::BAD_TCP_INTERNAL_ERROR,
                constants::ERR_BUFFER_TOO_SMALL,
            );
        }

        let limits = TransportLimits {
            protocol_version: ack.version,
            send_buffer_size: ack.receive_buffer_size,
            receive_buffer_size: ack.send_buffer_size,
            max_message_size: ack.max_message_size,
            max_chunk_count: ack.max_chunk_count,
        };
        self.open(limits, None)
    }

    fn on_hello(&mut self, hello: Hello) -> Step {
        let Some(config) = self.server_config() else {
            return self.reject(
                StatusCode::BAD_TCP_MESSAGE_TYPE_INVALID,
                constants::ERR_UNEXPECTED_HELLO,
            );
        };
        if self.state == HandshakeState::Closed {
            global_metrics().handshake_started();
        }
        debug!(endpoint_url = %hello.endpoint_url, version = hello.version, "Received Hello");

        if hello.version < config.protocol_version {
            return self.reject(
                StatusCode::BAD_PROTOCOL_VERSION_UNSUPPORTED,
                constants::ERR_VERSION_UNSUPPORTED,
            );
        }
        let url_len = hello.endpoint_url.as_str().map_or(0, str::len);
        if url_len > config.max_endpoint_url_length {
            return self.reject(
                StatusCode::BAD_TCP_ENDPOINT_URL_INVALID,
                constants::ERR_ENDPOINT_URL_TOO_LONG,
            );
        }
        if hello.receive_buffer_size < MIN_BUFFER_SIZE || hello.send_buffer_size < MIN_BUFFER_SIZE
        {
            return self.reject(
                StatusCode::BAD_TCP_INTERNAL_ERROR,
                constants::ERR_BUFFER_TOO_SMALL,
            );
        }

        let ack = Acknowledge {
            version: config.protocol_version,
            receive_buffer_size: hello.send_buffer_size.min(config.receive_buffer_size),
            send_buffer_size: hello.receive_buffer_size.min(config.send_buffer_size),
            max_message_size: config.max_message_size,
            max_chunk_count: config.max_chunk_count,
        };
        let limits = TransportLimits {
            protocol_version: ack.version,
            send_buffer_size: ack.send_buffer_size,
            receive_buffer_size: ack.receive_buffer_size,
            max_message_size: hello.max_message_size,
            max_chunk_count: hello.max_chunk_count,
        };
        self.peer_endpoint_url = Some(hello.endpoint_url);
        self.open(limits, Some(Message::Acknowledge(ack)))
    }

    fn open(&mut self, limits: TransportLimits, reply: Option<Message>) -> Step {
        self.state = HandshakeState::Open;
        self.limits = Some(limits);
        global_metrics().handshake_completed();
        info!(
            role = ?self.role(),
            send_buffer_size = limits.send_buffer_size,
            receive_buffer_size = limits.receive_buffer_size,
            "UACP connection open"
        );
        Step::Opened { reply, limits }
    }
}
