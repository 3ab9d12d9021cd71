//! Shared session handle passed to every component.
//!
//! The supervisor owns the connection; everything else talks to it through
//! [`SessionContext`]: a state watch, a command channel and a table of
//! pending request/response jobs keyed by job id.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::common::error::SteamError;
use crate::common::types::{EResult, SteamId};
use crate::protocol::cm::messages::CreateFriendInviteTokenResponse;

/// Session lifecycle. Any state falls back to `Disconnected` on a network
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Authenticating,
    LoggedOn,
    HandshakingGc,
    Ready,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Authenticating => "authenticating",
            SessionState::LoggedOn => "logged_on",
            SessionState::HandshakingGc => "handshaking_gc",
            SessionState::Ready => "ready",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which inbound message may complete a pending job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Gc(u32),
    AddFriend,
    ServiceMethod,
}

/// Raw response handed back to the waiting caller.
#[derive(Debug, Clone)]
pub struct JobResponse {
    pub eresult: EResult,
    pub body: Bytes,
}

/// Work for the connection loop.
#[derive(Debug)]
pub enum SessionCommand {
    RequestRichPresence { steam_ids: Vec<SteamId> },
    AddFriend { steam_id: SteamId, job_id: u64 },
    CreateInviteToken { limit: u32, duration: u32, job_id: u64 },
    SendGc { msg_type: u32, body: Vec<u8>, job_id: u64 },
    Relogin,
    LogOff,
}

impl SessionCommand {
    /// Job id carried by request/response commands.
    pub fn job_id(&self) -> Option<u64> {
        match self {
            SessionCommand::AddFriend { job_id, .. }
            | SessionCommand::CreateInviteToken { job_id, .. }
            | SessionCommand::SendGc { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }
}

struct PendingJob {
    expect: ResponseKind,
    tx: oneshot::Sender<Result<JobResponse, SteamError>>,
}

pub struct SessionContext {
    app_id: u32,
    state_tx: watch::Sender<SessionState>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    jobs: Mutex<HashMap<u64, PendingJob>>,
    next_job_id: AtomicU64,
    steam_id: AtomicU64,
    supplied_guard_code: Mutex<Option<String>>,
}

impl SessionContext {
    pub fn new(app_id: u32) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionCommand>) {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(Self {
            app_id,
            state_tx,
            commands,
            jobs: Mutex::new(HashMap::new()),
            next_job_id: AtomicU64::new(1),
            steam_id: AtomicU64::new(0),
            supplied_guard_code: Mutex::new(None),
        });
        (ctx, command_rx)
    }

    pub fn app_id(&self) -> u32 {
        self.app_id
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Logged on and the GC welcomed us.
    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = %current, to = %state, "Session state changed");
            *current = state;
            true
        });
    }

    /// Account the session is logged on as.
    pub fn steam_id(&self) -> Option<SteamId> {
        match self.steam_id.load(Ordering::Relaxed) {
            0 => None,
            id => Some(SteamId(id)),
        }
    }

    pub(crate) fn set_steam_id(&self, steam_id: Option<SteamId>) {
        self.steam_id
            .store(steam_id.map(|id| id.as_u64()).unwrap_or(0), Ordering::Relaxed);
    }

    // =========================================================================
    // Fire-and-forget operations
    // =========================================================================

    /// Ask for rich presence of `steam_ids`. Swallowed when not ready.
    pub fn request_rich_presence(&self, steam_ids: Vec<SteamId>) -> bool {
        if steam_ids.is_empty() {
            return false;
        }
        if !self.is_ready() {
            debug!(count = steam_ids.len(), "Session not ready, skipping rich presence request");
            return false;
        }
        self.commands
            .send(SessionCommand::RequestRichPresence { steam_ids })
            .is_ok()
    }

    /// Store a one-shot guard code and force a login attempt.
    pub fn supply_guard_code(&self, code: &str) {
        if let Ok(mut slot) = self.supplied_guard_code.lock() {
            *slot = Some(code.trim().to_string());
        }
        self.request_relogin();
    }

    pub(crate) fn take_supplied_guard_code(&self) -> Option<String> {
        self.supplied_guard_code.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Drop the current connection (if any) and log in again immediately.
    pub fn request_relogin(&self) {
        if self.commands.send(SessionCommand::Relogin).is_err() {
            warn!("Session supervisor is gone, relogin request dropped");
        }
    }

    /// Log off and stay offline until the next relogin request.
    pub fn log_off(&self) {
        if self.commands.send(SessionCommand::LogOff).is_err() {
            warn!("Session supervisor is gone, logoff request dropped");
        }
    }

    // =========================================================================
    // Request/response operations
    // =========================================================================

    /// Send a friend request (or accept an inbound one).
    pub async fn add_friend(&self, steam_id: SteamId, timeout: Duration) -> Result<(), SteamError> {
        let response = self
            .request(ResponseKind::AddFriend, timeout, |job_id| SessionCommand::AddFriend {
                steam_id,
                job_id,
            })
            .await?;

        if response.eresult.is_ok() {
            Ok(())
        } else {
            Err(SteamError::Rejected(response.eresult))
        }
    }

    /// Mint a quick-invite token.
    pub async fn create_invite_token(
        &self,
        limit: u32,
        duration: u32,
        timeout: Duration,
    ) -> Result<CreateFriendInviteTokenResponse, SteamError> {
        let response = self
            .request(ResponseKind::ServiceMethod, timeout, |job_id| {
                SessionCommand::CreateInviteToken {
                    limit,
                    duration,
                    job_id,
                }
            })
            .await?;

        match response.eresult {
            EResult::OK => {}
            EResult::ACCESS_DENIED => return Err(SteamError::Unsupported),
            other => return Err(SteamError::Rejected(other)),
        }

        <CreateFriendInviteTokenResponse as prost::Message>::decode(response.body)
            .map_err(|e| SteamError::Protocol(e.to_string()))
    }

    /// Send a GC message and wait for the response of `response_type`
    /// answering it.
    pub async fn gc_request(
        &self,
        msg_type: u32,
        body: Vec<u8>,
        response_type: u32,
        timeout: Duration,
    ) -> Result<Bytes, SteamError> {
        let response = self
            .request(ResponseKind::Gc(response_type), timeout, |job_id| SessionCommand::SendGc {
                msg_type,
                body,
                job_id,
            })
            .await?;
        Ok(response.body)
    }

    async fn request<F>(&self, expect: ResponseKind, timeout: Duration, build: F) -> Result<JobResponse, SteamError>
    where
        F: FnOnce(u64) -> SessionCommand,
    {
        if !self.is_ready() {
            return Err(SteamError::NotReady);
        }

        let job_id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.jobs_lock().insert(job_id, PendingJob { expect, tx });

        if self.commands.send(build(job_id)).is_err() {
            self.jobs_lock().remove(&job_id);
            return Err(SteamError::Disconnected);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SteamError::Disconnected),
            Err(_) => {
                self.jobs_lock().remove(&job_id);
                debug!(job_id, ?expect, "Job timed out");
                Err(SteamError::Timeout)
            }
        }
    }

    /// Deliver a response to the job waiting on `job_id`.
    ///
    /// Only completes the job when `kind` is what the job expects, so a
    /// stray or duplicate response is never attributed to the wrong caller.
    pub(crate) fn complete_job(&self, job_id: u64, kind: ResponseKind, response: JobResponse) -> bool {
        let mut jobs = self.jobs_lock();
        match jobs.get(&job_id) {
            Some(pending) if pending.expect == kind => {}
            Some(pending) => {
                debug!(job_id, expected = ?pending.expect, got = ?kind, "Ignoring response of unexpected type");
                return false;
            }
            None => {
                debug!(job_id, ?kind, "Ignoring response for unknown job");
                return false;
            }
        }
        match jobs.remove(&job_id) {
            Some(pending) => pending.tx.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    /// Fail one job (the request could not be sent).
    pub(crate) fn fail_job(&self, job_id: u64, error: SteamError) {
        if let Some(pending) = self.jobs_lock().remove(&job_id) {
            let _ = pending.tx.send(Err(error));
        }
    }

    /// Fail every pending job, used when the connection drops.
    pub(crate) fn fail_all_jobs(&self, error: SteamError) -> usize {
        let drained: Vec<PendingJob> = self.jobs_lock().drain().map(|(_, job)| job).collect();
        let count = drained.len();
        for job in drained {
            let _ = job.tx.send(Err(error.clone()));
        }
        count
    }

    #[cfg(test)]
    pub fn pending_jobs(&self) -> usize {
        self.jobs_lock().len()
    }

    fn jobs_lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingJob>> {
        // A poisoned map only means a panic elsewhere; the entries are still valid.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
