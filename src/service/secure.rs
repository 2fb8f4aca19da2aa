//! Current/previous security token store for one secure channel.
//!
//! After a renewal the peer may still send chunks protected by the old token
//! for a short while, so the receive path tries the current token first and
//! falls back to the previous one until its grace window has elapsed. The send
//! path always uses the current token.

use crate::config::SecurityConfig;
use crate::core::timestamp::Timestamp;
use crate::error::{constants, ProtocolError, Result};
use crate::service::security_token::{ChannelSecurityToken, DEFAULT_RENEWAL_FRACTION};
use crate::utils::metrics::global_metrics;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, instrument, warn};

#[derive(Debug, Default)]
struct TokenPair {
    current: Option<Arc<ChannelSecurityToken>>,
    previous: Option<Arc<ChannelSecurityToken>>,
}

/// Two-slot token store. Cloning shares the same slots.
#[derive(Debug, Clone)]
pub struct SecurityTokens {
    slots: Arc<RwLock<TokenPair>>,
    grace_period: Duration,
    renewal_fraction: f64,
    requested_lifetime: u32,
}

impl Default for SecurityTokens {
    fn default() -> Self {
        Self::from_config(&SecurityConfig::default())
    }
}

impl SecurityTokens {
    pub fn new(grace_period: Duration) -> Self {
        let defaults = SecurityConfig::default();
        Self {
            slots: Arc::new(RwLock::new(TokenPair::default())),
            grace_period,
            renewal_fraction: DEFAULT_RENEWAL_FRACTION,
            requested_lifetime: defaults.requested_lifetime_ms(),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self {
            renewal_fraction: config.renewal_fraction,
            requested_lifetime: config.requested_lifetime_ms(),
            ..Self::new(config.token_grace_period)
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn renewal_fraction(&self) -> f64 {
        self.renewal_fraction
    }

    /// Lifetime in milliseconds to request when opening or renewing the channel.
    pub fn requested_lifetime(&self) -> u32 {
        self.requested_lifetime
    }

    /// When the current token should be renewed, `None` before the first install.
    pub fn renewal_deadline(&self) -> Result<Option<Timestamp>> {
        Ok(self
            .read()?
            .current
            .as_ref()
            .map(|token| token.renew_at(self.renewal_fraction)))
    }

    /// Whether a renewal is due at `now`. Always false without a current token.
    pub fn renewal_due(&self, now: Timestamp) -> Result<bool> {
        Ok(self.renewal_deadline()?.is_some_and(|deadline| now >= deadline))
    }

    /// Make `token` current and keep the replaced one as previous.
    ///
    /// # Errors
    /// `InvalidToken` if the token belongs to another channel or its id does not
    /// increase. The store is unchanged in that case.
    #[instrument(skip(self), fields(channel_id = token.channel_id, token_id = token.token_id))]
    pub fn install(&self, token: ChannelSecurityToken) -> Result<()> {
        let mut slots = self.slots.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_TOKEN_STORE_LOCK.to_string())
        })?;

        if let Some(current) = slots.current.as_deref() {
            let reason = if token.channel_id != current.channel_id {
                Some(constants::ERR_TOKEN_CHANNEL_CHANGED)
            } else if token.token_id <= current.token_id {
                Some(constants::ERR_TOKEN_ID_NOT_INCREASING)
            } else {
                None
            };
            if let Some(reason) = reason {
                warn!(current_token_id = current.token_id, reason, "Rejected security token");
                global_metrics().token_rejected();
                return Err(ProtocolError::InvalidToken(reason.to_string()));
            }
        }

        // Single write lock: readers see either the old pair or the new one
        slots.previous = slots.current.take();
        slots.current = Some(Arc::new(token));
        global_metrics().token_installed();
        debug!(lifetime_ms = token.revised_lifetime, "Installed security token");
        Ok(())
    }

    /// Token used to protect outgoing chunks.
    pub fn current(&self) -> Result<Option<Arc<ChannelSecurityToken>>> {
        Ok(self.read()?.current.clone())
    }

    /// Token replaced by the last install, regardless of its grace window.
    pub fn previous(&self) -> Result<Option<Arc<ChannelSecurityToken>>> {
        Ok(self.read()?.previous.clone())
    }

    /// Tokens to try for an incoming chunk, most recent first.
    pub fn receive_candidates(&self, now: Timestamp) -> Result<Vec<Arc<ChannelSecurityToken>>> {
        let slots = self.read()?;
        let mut candidates = Vec::with_capacity(2);
        if let Some(current) = &slots.current {
            candidates.push(Arc::clone(current));
        }
        if let Some(previous) = &slots.previous {
            if previous.accepts_at(now, self.grace_period) {
                candidates.push(Arc::clone(previous));
            }
        }
        Ok(candidates)
    }

    /// Candidate carrying `token_id`, if it is still accepted at `now`.
    pub fn find(&self, token_id: u32, now: Timestamp) -> Result<Option<Arc<ChannelSecurityToken>>> {
        let found = self
            .receive_candidates(now)?
            .into_iter()
            .enumerate()
            .find(|(_, token)| token.token_id == token_id);

        Ok(found.map(|(index, token)| {
            if index > 0 {
                debug!(token_id, "Accepted chunk under previous token");
                global_metrics().previous_token_fallback();
            }
            token
        }))
    }

    /// Like [`SecurityTokens::find`], failing with `InvalidToken` when nothing matches.
    pub fn require(&self, token_id: u32, now: Timestamp) -> Result<Arc<ChannelSecurityToken>> {
        self.find(token_id, now)?
            .ok_or_else(|| ProtocolError::InvalidToken(format!("Unknown token id {token_id}")))
    }

    pub fn clear(&self) -> Result<()> {
        let mut slots = self.slots.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_TOKEN_STORE_LOCK.to_string())
        })?;
        *slots = TokenPair::default();
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, TokenPair>> {
        self.slots
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_TOKEN_STORE_LOCK.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn token(token_id: u32, created_ms: u64) -> ChannelSecurityToken {
        ChannelSecurityToken::new(7, token_id, Timestamp::from_unix_millis(created_ms), 10_000)
    }

    #[test]
    fn test_install_rotates_slots() {
        let store = SecurityTokens::new(Duration::from_secs(5));
        assert!(store.current().unwrap().is_none());

        store.install(token(1, 0)).unwrap();
        store.install(token(2, 7_500)).unwrap();

        assert_eq!(store.current().unwrap().unwrap().token_id, 2);
        assert_eq!(store.previous().unwrap().unwrap().token_id, 1);
    }

    #[test]
    fn test_rejects_foreign_channel_and_stale_id() {
        let store = SecurityTokens::new(Duration::from_secs(5));
        store.install(token(3, 0)).unwrap();

        let foreign = ChannelSecurityToken::new(8, 4, Timestamp::from_unix_millis(0), 10_000);
        assert!(matches!(
            store.install(foreign),
            Err(ProtocolError::InvalidToken(_))
        ));
        assert!(matches!(
            store.install(token(3, 1)),
            Err(ProtocolError::InvalidToken(_))
        ));
        assert_eq!(store.current().unwrap().unwrap().token_id, 3);
        assert!(store.previous().unwrap().is_none());
    }

    #[test]
    fn test_previous_honoured_only_within_grace() {
        let store = SecurityTokens::new(Duration::from_secs(5));
        store.install(token(1, 0)).unwrap();
        store.install(token(2, 7_500)).unwrap();

        // token 1 expires at 10s, grace ends at 15s
        let within = Timestamp::from_unix_millis(14_999);
        let after = Timestamp::from_unix_millis(15_000);

        let ids: Vec<u32> = store
            .receive_candidates(within)
            .unwrap()
            .iter()
            .map(|t| t.token_id)
            .collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(store.find(1, within).unwrap().unwrap().token_id, 1);

        assert_eq!(store.receive_candidates(after).unwrap().len(), 1);
        assert!(store.find(1, after).unwrap().is_none());
        assert!(matches!(
            store.require(1, after),
            Err(ProtocolError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_configured_fraction_moves_renewal_deadline() {
        let config = SecurityConfig {
            renewal_fraction: 0.5,
            ..SecurityConfig::default()
        };
        let store = SecurityTokens::from_config(&config);
        assert!(store.renewal_deadline().unwrap().is_none());
        assert!(!store.renewal_due(Timestamp::from_unix_millis(1_000_000)).unwrap());

        store.install(token(1, 0)).unwrap();
        assert_eq!(
            store.renewal_deadline().unwrap(),
            Some(Timestamp::from_unix_millis(5_000))
        );
        assert!(!store.renewal_due(Timestamp::from_unix_millis(4_999)).unwrap());
        assert!(store.renewal_due(Timestamp::from_unix_millis(5_000)).unwrap());

        let default_store = SecurityTokens::default();
        default_store.install(token(1, 0)).unwrap();
        assert_eq!(
            default_store.renewal_deadline().unwrap(),
            Some(Timestamp::from_unix_millis(7_500))
        );
        assert_eq!(default_store.requested_lifetime(), 3_600_000);
    }

    #[test]
    fn test_clones_share_slots() {
        let store = SecurityTokens::default();
        let reader = store.clone();
        store.install(token(1, 0)).unwrap();
        assert_eq!(reader.current().unwrap().unwrap().token_id, 1);

        reader.clear().unwrap();
        assert!(store.current().unwrap().is_none());
    }
}
