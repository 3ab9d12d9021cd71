//! Keeps a target number of unused, unexpired quick-invite tokens.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::common::error::{SteamError, StoreResult};
use crate::common::types::SteamId;
use crate::common::unix_timestamp;
use crate::session::SessionContext;
use crate::store::{BridgeStore, NewInvite};

/// Hex digits `0-f` as they appear in friend codes.
const FRIEND_CODE_ALPHABET: &[u8; 16] = b"bcdfghjkmnpqrtvw";

#[derive(Debug, Clone)]
pub struct InviteSettings {
    pub target: i64,
    pub limit: u32,
    pub duration_secs: u32,
    pub request_timeout: Duration,
}

/// Counters for one refresh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InviteRefresh {
    pub expired: u64,
    /// Available tokens before creation.
    pub available: i64,
    pub created: usize,
}

/// Friend code of an account: the account id in hex, each digit mapped onto
/// [`FRIEND_CODE_ALPHABET`], with a dash in the middle.
pub fn friend_code(steam_id: SteamId) -> String {
    let mapped: String = format!("{:x}", steam_id.account_id())
        .bytes()
        .map(|digit| {
            let value = (digit as char).to_digit(16).unwrap_or(0) as usize;
            FRIEND_CODE_ALPHABET[value] as char
        })
        .collect();
    let (head, tail) = mapped.split_at(mapped.len() / 2);
    format!("{}-{}", head, tail)
}

pub fn invite_link(steam_id: SteamId, token: &str) -> String {
    format!("https://s.team/p/{}/{}", friend_code(steam_id), token)
}

pub struct InvitePoolManager {
    store: BridgeStore,
    ctx: Arc<SessionContext>,
    settings: InviteSettings,
    disabled: AtomicBool,
}

impl InvitePoolManager {
    pub fn new(store: BridgeStore, ctx: Arc<SessionContext>, settings: InviteSettings) -> Self {
        Self {
            store,
            ctx,
            settings,
            disabled: AtomicBool::new(false),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    /// Expire stale tokens, then mint the shortfall one at a time, stopping
    /// at the first error.
    pub async fn refresh_once(&self) -> StoreResult<InviteRefresh> {
        let mut refresh = InviteRefresh::default();
        if self.is_disabled() {
            return Ok(refresh);
        }

        let now = unix_timestamp();
        refresh.expired = self.store.expire_invites(now).await?;
        if refresh.expired > 0 {
            info!(count = refresh.expired, "Invite tokens expired");
        }
        refresh.available = self.store.count_available_invites(now).await?;

        let shortfall = (self.settings.target - refresh.available).max(0);
        if shortfall == 0 {
            return Ok(refresh);
        }
        if !self.ctx.is_ready() {
            debug!(shortfall, "Session not ready, invite creation skipped");
            return Ok(refresh);
        }

        for _ in 0..shortfall {
            if !self.ctx.is_ready() {
                break;
            }
            let Some(steam_id) = self.ctx.steam_id() else {
                warn!("Logged on without a steam id, cannot build invite links");
                break;
            };

            let response = match self
                .ctx
                .create_invite_token(self.settings.limit, self.settings.duration_secs, self.settings.request_timeout)
                .await
            {
                Ok(response) => response,
                Err(SteamError::Unsupported) => {
                    if !self.disabled.swap(true, Ordering::Relaxed) {
                        warn!("Account cannot create invite tokens, invite pool disabled");
                    }
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Invite token creation failed");
                    break;
                }
            };

            let Some(token) = response.invite_token.filter(|t| !t.is_empty()) else {
                warn!("Invite token response without a token");
                break;
            };

            let now = unix_timestamp();
            let created_at = response.time_created.map(i64::from).filter(|&t| t > 0).unwrap_or(now);
            let duration = response
                .invite_duration
                .map(|d| d as i64)
                .unwrap_or(self.settings.duration_secs as i64);
            let link = invite_link(steam_id, &token);

            self.store
                .upsert_invite(
                    &NewInvite {
                        token: &token,
                        invite_link: &link,
                        invite_limit: Some(response.invite_limit.map(|l| l as i64).unwrap_or(self.settings.limit as i64)),
                        invite_duration: Some(duration),
                        created_at,
                        expires_at: (duration > 0).then_some(created_at + duration),
                    },
                    now,
                )
                .await?;
            debug!(token = %token, "Invite token created");
            refresh.created += 1;
        }

        if refresh.created > 0 {
            info!(created = refresh.created, target = self.settings.target, "Invite pool topped up");
        }
        Ok(refresh)
    }
}
