//! Rate-limited outbound friend requests and inbound auto-accept.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::common::error::{SteamError, StoreResult};
use crate::common::types::{FriendRelationship, SteamId};
use crate::common::unix_timestamp;
use crate::session::SessionContext;
use crate::store::{BridgeStore, FriendDrainWindow};

#[derive(Debug, Clone)]
pub struct DrainerSettings {
    pub batch_size: i64,
    pub retry_after_secs: i64,
    pub max_attempts: i64,
    pub request_timeout: Duration,
}

/// Counters for one drain cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    pub sent: usize,
    pub failed_attempts: usize,
    /// Jobs moved to `failed` after using every attempt.
    pub exhausted: u64,
    /// Remembered inbound requests accepted this cycle.
    pub accepted: usize,
}

pub struct FriendRequestDrainer {
    store: BridgeStore,
    ctx: Arc<SessionContext>,
    settings: DrainerSettings,
    /// Inbound requests not yet accepted.
    inbound: Mutex<BTreeSet<SteamId>>,
}

impl FriendRequestDrainer {
    pub fn new(store: BridgeStore, ctx: Arc<SessionContext>, settings: DrainerSettings) -> Self {
        Self {
            store,
            ctx,
            settings,
            inbound: Mutex::new(BTreeSet::new()),
        }
    }

    /// One drain cycle: retire exhausted jobs, accept remembered inbound
    /// requests, then send up to `batch_size` due requests.
    pub async fn drain_once(&self) -> StoreResult<DrainSummary> {
        let mut summary = DrainSummary {
            exhausted: self
                .store
                .fail_exhausted_friend_requests(self.settings.max_attempts)
                .await?,
            ..Default::default()
        };
        if summary.exhausted > 0 {
            warn!(count = summary.exhausted, "Friend requests failed after max attempts");
        }

        if !self.ctx.is_ready() {
            debug!("Session not ready, friend drain skipped");
            return Ok(summary);
        }

        let remembered: Vec<SteamId> = std::mem::take(&mut *self.inbound()).into_iter().collect();
        for steam_id in remembered {
            if self.accept(steam_id).await? {
                summary.accepted += 1;
            }
        }

        let now = unix_timestamp();
        let due = self
            .store
            .due_friend_requests(FriendDrainWindow {
                now,
                retry_after_secs: self.settings.retry_after_secs,
                max_attempts: self.settings.max_attempts,
                limit: self.settings.batch_size,
            })
            .await?;

        for job in due {
            let Ok(steam_id) = job.steam_id.parse::<SteamId>() else {
                warn!(steam_id = %job.steam_id, "Skipping friend request with malformed steam id");
                continue;
            };
            if !self.ctx.is_ready() {
                debug!("Session dropped out of ready, stopping friend drain");
                break;
            }

            match self.ctx.add_friend(steam_id, self.settings.request_timeout).await {
                Ok(()) => {
                    self.store.mark_friend_request_sent(steam_id, unix_timestamp()).await?;
                    info!(steam_id = steam_id.as_u64(), "Friend request sent");
                    summary.sent += 1;
                }
                Err(SteamError::NotReady) => break,
                Err(e) => {
                    self.store
                        .record_friend_request_failure(steam_id, &e.to_string(), unix_timestamp())
                        .await?;
                    warn!(
                        steam_id = steam_id.as_u64(),
                        attempt = job.attempts + 1,
                        error = %e,
                        "Friend request failed"
                    );
                    summary.failed_attempts += 1;
                }
            }
        }

        Ok(summary)
    }

    /// React to a relationship change reported by the session.
    pub async fn handle_relationship(
        &self,
        steam_id: SteamId,
        relationship: FriendRelationship,
    ) -> StoreResult<()> {
        match relationship {
            FriendRelationship::RequestRecipient => {
                if self.ctx.is_ready() {
                    self.accept(steam_id).await?;
                } else {
                    debug!(steam_id = steam_id.as_u64(), "Inbound friend request queued until ready");
                    self.inbound().insert(steam_id);
                }
            }
            FriendRelationship::Friend => {
                self.inbound().remove(&steam_id);
                if self.store.mark_friend_request_sent(steam_id, unix_timestamp()).await? {
                    info!(steam_id = steam_id.as_u64(), "Friend request accepted by the other side");
                }
            }
            FriendRelationship::None => {
                self.inbound().remove(&steam_id);
            }
            _ => {}
        }
        Ok(())
    }

    /// Accept an inbound request. Failures are remembered for the next
    /// cycle. Returns `true` when accepted.
    async fn accept(&self, steam_id: SteamId) -> StoreResult<bool> {
        match self.ctx.add_friend(steam_id, self.settings.request_timeout).await {
            Ok(()) => {
                let had_job = self.store.mark_friend_request_sent(steam_id, unix_timestamp()).await?;
                info!(steam_id = steam_id.as_u64(), had_job, "Inbound friend request accepted");
                Ok(true)
            }
            Err(e) => {
                warn!(steam_id = steam_id.as_u64(), error = %e, "Could not accept inbound friend request");
                self.inbound().insert(steam_id);
                Ok(false)
            }
        }
    }

    #[cfg(test)]
    pub fn pending_inbound(&self) -> usize {
        self.inbound().len()
    }

    fn inbound(&self) -> MutexGuard<'_, BTreeSet<SteamId>> {
        self.inbound.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::EResult;
    use crate::session::context::{JobResponse, ResponseKind, SessionCommand, SessionState};
    use tokio::sync::mpsc;

    async fn drainer() -> (FriendRequestDrainer, BridgeStore, Arc<SessionContext>, mpsc::UnboundedReceiver<SessionCommand>) {
        let store = BridgeStore::open_in_memory().await.unwrap();
        let (ctx, commands) = SessionContext::new(1422450);
        let settings = DrainerSettings {
            batch_size: 5,
            retry_after_secs: 900,
            max_attempts: 3,
            request_timeout: Duration::from_millis(200),
        };
        (FriendRequestDrainer::new(store.clone(), ctx.clone(), settings), store, ctx, commands)
    }

    /// Answer every add-friend command with `result` and report the ids.
    fn fake_steam(
        ctx: Arc<SessionContext>,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        result: EResult,
    ) -> mpsc::UnboundedReceiver<SteamId> {
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                if let SessionCommand::AddFriend { steam_id, job_id } = command {
                    let _ = seen_tx.send(steam_id);
                    ctx.complete_job(
                        job_id,
                        ResponseKind::AddFriend,
                        JobResponse {
                            eresult: result,
                            body: Default::default(),
                        },
                    );
                }
            }
        });
        seen_rx
    }

    #[tokio::test]
    async fn test_drain_sends_due_requests() {
        let (drainer, store, ctx, commands) = drainer().await;
        ctx.set_state(SessionState::Ready);
        let mut seen = fake_steam(ctx.clone(), commands, EResult::OK);

        store.enqueue_friend_request(SteamId(1), 100).await.unwrap();
        store.enqueue_friend_request(SteamId(2), 101).await.unwrap();

        let summary = drainer.drain_once().await.unwrap();
        assert_eq!(summary.sent, 2);
        assert_eq!(seen.recv().await, Some(SteamId(1)));
        assert_eq!(seen.recv().await, Some(SteamId(2)));

        let job = store.get_friend_request(SteamId(1)).await.unwrap().unwrap();
        assert_eq!(job.status, "sent");
        assert_eq!(job.attempts, 1);

        // Nothing left to do
        assert_eq!(drainer.drain_once().await.unwrap(), DrainSummary::default());
    }

    #[tokio::test]
    async fn test_failures_are_counted_then_exhausted() {
        let (drainer, store, ctx, commands) = drainer().await;
        ctx.set_state(SessionState::Ready);
        let _seen = fake_steam(ctx.clone(), commands, EResult::LIMIT_EXCEEDED);

        store.enqueue_friend_request(SteamId(1), 100).await.unwrap();

        let summary = drainer.drain_once().await.unwrap();
        assert_eq!(summary.failed_attempts, 1);
        let job = store.get_friend_request(SteamId(1)).await.unwrap().unwrap();
        assert_eq!(job.status, "pending");
        assert_eq!(job.attempts, 1);
        assert!(job.error.as_deref().unwrap().contains("LimitExceeded"));

        // Retry window not reached yet
        assert_eq!(drainer.drain_once().await.unwrap().failed_attempts, 0);

        // Pretend the budget ran out
        sqlx::query("UPDATE steam_friend_requests SET attempts = 3")
            .execute(store.pool())
            .await
            .unwrap();
        let summary = drainer.drain_once().await.unwrap();
        assert_eq!(summary.exhausted, 1);
        let job = store.get_friend_request(SteamId(1)).await.unwrap().unwrap();
        assert_eq!(job.status, "failed");
        assert!(job.error.unwrap().contains("LimitExceeded"));
    }

    #[tokio::test]
    async fn test_not_ready_sends_nothing() {
        let (drainer, store, _ctx, mut commands) = drainer().await;
        store.enqueue_friend_request(SteamId(1), 100).await.unwrap();

        let summary = drainer.drain_once().await.unwrap();
        assert_eq!(summary, DrainSummary::default());
        assert!(commands.try_recv().is_err());
        let job = store.get_friend_request(SteamId(1)).await.unwrap().unwrap();
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn test_inbound_request_marks_job_sent() {
        let (drainer, store, ctx, commands) = drainer().await;
        ctx.set_state(SessionState::Ready);
        let mut seen = fake_steam(ctx.clone(), commands, EResult::OK);

        store.enqueue_friend_request(SteamId(7), 100).await.unwrap();
        drainer
            .handle_relationship(SteamId(7), FriendRelationship::RequestRecipient)
            .await
            .unwrap();

        assert_eq!(seen.recv().await, Some(SteamId(7)));
        let job = store.get_friend_request(SteamId(7)).await.unwrap().unwrap();
        assert_eq!(job.status, "sent");

        // The drainer has nothing left to send for this account
        let summary = drainer.drain_once().await.unwrap();
        assert_eq!(summary.sent, 0);
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_inbound_while_offline_accepted_next_cycle() {
        let (drainer, _store, ctx, commands) = drainer().await;
        drainer
            .handle_relationship(SteamId(9), FriendRelationship::RequestRecipient)
            .await
            .unwrap();
        assert_eq!(drainer.pending_inbound(), 1);

        ctx.set_state(SessionState::Ready);
        let mut seen = fake_steam(ctx.clone(), commands, EResult::OK);
        let summary = drainer.drain_once().await.unwrap();
        assert_eq!(summary.accepted, 1);
        assert_eq!(seen.recv().await, Some(SteamId(9)));
        assert_eq!(drainer.pending_inbound(), 0);
    }

    #[tokio::test]
    async fn test_friend_relationship_marks_sent() {
        let (drainer, store, _ctx, _commands) = drainer().await;
        store.enqueue_friend_request(SteamId(3), 100).await.unwrap();

        drainer
            .handle_relationship(SteamId(3), FriendRelationship::Friend)
            .await
            .unwrap();
        let job = store.get_friend_request(SteamId(3)).await.unwrap().unwrap();
        assert_eq!(job.status, "sent");
        assert_eq!(job.attempts, 1);
    }
}
