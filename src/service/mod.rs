//! # Secure Channel Services
//!
//! Security token model shared with the secure-channel layer that sits on top
//! of an open UACP connection.

pub mod secure;
pub mod security_token;

pub use secure::SecurityTokens;
pub use security_token::ChannelSecurityToken;
