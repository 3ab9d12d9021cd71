//! Steam session supervisor.
//!
//! Owns the CM connection: logs on, keeps the login key current, runs the
//! heartbeat and the GC handshake, routes responses to waiting jobs and
//! publishes inbound events. Every disconnect funnels into one reconnect
//! timer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::common::error::{AuthError, SteamError};
use crate::common::messages::{PresenceUpdate, SteamEvent};
use crate::common::reconnect::{ReconnectConfig, ReconnectTimer};
use crate::common::types::{EResult, FriendRelationship, SteamId};
use crate::common::unix_timestamp;
use crate::protocol::cm::messages::{
    unpack_multi, ClientAddFriend, ClientAddFriendResponse, ClientFriendsList, ClientGamesPlayed,
    ClientHeartBeat, ClientLogOff, ClientLoggedOff, ClientLogon, ClientLogonResponse,
    ClientNewLoginKey, ClientNewLoginKeyAccepted, ClientRichPresenceInfo,
    ClientRichPresenceRequest, CreateFriendInviteTokenRequest, GamePlayed, GcClientMessage,
    PROTOCOL_VERSION,
};
use crate::protocol::cm::{connect_to_cm, new_cm_connection, parse_binary_kv, CmConnection};
use crate::protocol::gc::messages::{
    gc_msg_name, ClientHello, ConnectionStatus, CLIENT_CONNECTION_STATUS, CLIENT_HELLO,
    CLIENT_WELCOME, STATUS_HAVE_SESSION,
};
use crate::protocol::gc::GcMessage;
use crate::protocol::packets::{emsg, Packet, PROTO_MASK};
use crate::session::context::{JobResponse, ResponseKind, SessionCommand, SessionContext, SessionState};
use crate::session::credentials::CredentialStore;
use crate::session::guard::GuardCodeSource;

/// `EOSType` announced at logon (Windows 10).
const CLIENT_OS_TYPE: u32 = 16;
/// Heartbeat period when the logon response does not specify one.
const DEFAULT_HEARTBEAT_SECS: u64 = 9;
/// Consecutive guard prompts tolerated before giving up.
const MAX_GUARD_ATTEMPTS: u32 = 3;

/// Settings the supervisor needs from the configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub account_name: String,
    pub password: Option<String>,
    pub cm_servers: Vec<String>,
    pub reconnect_delay: Duration,
    pub gc_hello_interval: Duration,
    pub connect_timeout: Duration,
    pub shared_secret: Option<String>,
    pub guard_code: Option<String>,
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Remote closed the socket.
    Closed,
    /// Transport or framing failure.
    Error(String),
    /// `ClientLoggedOff` from the network.
    LoggedOff(EResult),
    /// Temporary logon failure on the Steam side.
    Transient(EResult),
    /// Log on again right away (guard code obtained, key rejected, relogin).
    RetryNow,
    /// Operator asked to stay offline.
    LogOffRequested,
    Shutdown,
}

/// Which kind of guard code the last prompt asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardKind {
    Email,
    TwoFactor,
}

/// Per-connection state.
struct LiveSession {
    steam_id: Option<SteamId>,
    session_id: i32,
    used_login_key: bool,
    heartbeat: Option<Interval>,
    gc_hello: Option<Interval>,
}

pub struct SessionSupervisor {
    settings: SessionSettings,
    ctx: Arc<SessionContext>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    events: mpsc::UnboundedSender<SteamEvent>,
    credentials: CredentialStore,
    guard: GuardCodeSource,
    reconnect: ReconnectTimer,
    shutdown_rx: watch::Receiver<bool>,
    pending_guard_code: Option<String>,
    guard_kind: GuardKind,
    guard_attempts: u32,
}

impl SessionSupervisor {
    pub fn new(
        settings: SessionSettings,
        ctx: Arc<SessionContext>,
        commands: mpsc::UnboundedReceiver<SessionCommand>,
        events: mpsc::UnboundedSender<SteamEvent>,
        credentials: CredentialStore,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let secret = settings
            .shared_secret
            .clone()
            .or_else(|| credentials.shared_secret().map(String::from));
        let guard = GuardCodeSource::new(secret, settings.guard_code.clone());
        let reconnect = ReconnectTimer::new(ReconnectConfig {
            delay: settings.reconnect_delay,
            max_delay: settings.reconnect_delay,
            multiplier: 1.0,
        });

        Self {
            settings,
            ctx,
            commands,
            events,
            credentials,
            guard,
            reconnect,
            shutdown_rx,
            pending_guard_code: None,
            guard_kind: GuardKind::TwoFactor,
            guard_attempts: 0,
        }
    }

    /// Total reconnects scheduled so far.
    #[cfg(test)]
    pub fn reconnects_scheduled(&self) -> u64 {
        self.reconnect.scheduled_total()
    }

    /// Run until shutdown. Returns an error only for fatal authentication
    /// failures.
    pub async fn run(mut self) -> Result<(), AuthError> {
        self.reconnect.schedule_in(Duration::ZERO);

        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }

                _ = self.reconnect.fired() => {
                    let reason = match connect_to_cm(&self.settings.cm_servers, self.settings.connect_timeout).await {
                        Ok((stream, _addr)) => self.handle_connection(stream).await?,
                        Err(e) => {
                            warn!(error = %e, "Could not reach any connection manager");
                            DisconnectReason::Error(e.to_string())
                        }
                    };
                    if reason == DisconnectReason::Shutdown {
                        break;
                    }
                    self.on_disconnect(reason);
                }

                Some(command) = self.commands.recv() => {
                    self.handle_offline_command(command);
                }
            }
        }

        self.mark_disconnected();
        info!("Session supervisor stopped");
        Ok(())
    }

    /// Record a disconnect and arm the reconnect timer. Repeated signals
    /// while a reconnect is pending are ignored.
    pub fn on_disconnect(&mut self, reason: DisconnectReason) {
        self.mark_disconnected();

        match reason {
            DisconnectReason::Shutdown => {}
            DisconnectReason::LogOffRequested => {
                self.reconnect.cancel();
                info!("Logged off on request, staying offline until relogin");
            }
            DisconnectReason::RetryNow => {
                self.reconnect.reschedule_now();
            }
            other => {
                if self.reconnect.schedule() {
                    info!(
                        reason = ?other,
                        delay_secs = self.settings.reconnect_delay.as_secs(),
                        reconnects = self.reconnect.scheduled_total(),
                        "Disconnected, reconnect scheduled"
                    );
                } else {
                    debug!(reason = ?other, "Reconnect already pending");
                }
            }
        }
    }

    fn mark_disconnected(&self) {
        self.ctx.set_state(SessionState::Disconnected);
        self.ctx.set_steam_id(None);
        let failed = self.ctx.fail_all_jobs(SteamError::Disconnected);
        if failed > 0 {
            debug!(jobs = failed, "Failed pending jobs on disconnect");
        }
    }

    fn handle_offline_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Relogin => {
                info!("Relogin requested");
                self.reconnect.reschedule_now();
            }
            SessionCommand::LogOff => {
                self.reconnect.cancel();
                info!("Logoff requested while offline, reconnect cancelled");
            }
            SessionCommand::RequestRichPresence { .. } => {
                debug!("Dropping rich presence request while offline");
            }
            other => {
                if let Some(job_id) = other.job_id() {
                    self.ctx.fail_job(job_id, SteamError::NotReady);
                }
            }
        }
    }

    /// Drive one CM connection until it ends.
    pub async fn handle_connection<S>(&mut self, stream: S) -> Result<DisconnectReason, AuthError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut connection = new_cm_connection(stream);
        self.ctx.set_state(SessionState::Authenticating);

        let (logon, used_login_key) = self.build_logon().await?;
        let mut live = LiveSession {
            steam_id: None,
            session_id: 0,
            used_login_key,
            heartbeat: None,
            gc_hello: None,
        };

        // Anonymous individual id until the logon response assigns ours
        let logon_packet = Packet::from_message(emsg::CLIENT_LOGON, &logon)
            .with_session(SteamId::from_account_id(0).as_u64(), 0);
        if let Err(e) = connection.send(logon_packet).await {
            return Ok(DisconnectReason::Error(e.to_string()));
        }
        info!(
            account = %self.settings.account_name,
            login_key = used_login_key,
            "Logon sent"
        );

        loop {
            tokio::select! {
                packet = connection.next() => {
                    match packet {
                        Some(Ok(packet)) => {
                            if let Some(reason) = self.handle_packet(&mut connection, &mut live, packet).await? {
                                return Ok(reason);
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "CM stream error");
                            return Ok(DisconnectReason::Error(e.to_string()));
                        }
                        None => return Ok(DisconnectReason::Closed),
                    }
                }

                _ = tick(&mut live.heartbeat) => {
                    let heartbeat = self.outgoing(&live, Packet::from_message(emsg::CLIENT_HEART_BEAT, &ClientHeartBeat {}));
                    if let Err(e) = connection.send(heartbeat).await {
                        return Ok(DisconnectReason::Error(e.to_string()));
                    }
                }

                _ = tick(&mut live.gc_hello) => {
                    if let Err(e) = self.send_gc_hello(&mut connection, &live).await {
                        return Ok(DisconnectReason::Error(e));
                    }
                }

                Some(command) = self.commands.recv() => {
                    if let Some(reason) = self.handle_command(&mut connection, &live, command).await {
                        return Ok(reason);
                    }
                }

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received, logging off");
                        let log_off = self.outgoing(&live, Packet::from_message(emsg::CLIENT_LOG_OFF, &ClientLogOff {}));
                        if let Err(e) = connection.send(log_off).await {
                            warn!(error = %e, "Failed to send logoff");
                        }
                        return Ok(DisconnectReason::Shutdown);
                    }
                }
            }
        }
    }

    /// Logon message: the stored login key when available, otherwise
    /// password plus a guard code when one can be produced.
    async fn build_logon(&mut self) -> Result<(ClientLogon, bool), AuthError> {
        let mut logon = ClientLogon {
            protocol_version: Some(PROTOCOL_VERSION),
            client_os_type: Some(CLIENT_OS_TYPE),
            client_language: Some("english".to_string()),
            account_name: Some(self.settings.account_name.clone()),
            should_remember_password: Some(true),
            machine_name: Some("steam-bridge".to_string()),
            ..Default::default()
        };

        if self.pending_guard_code.is_none() {
            if let Some(code) = self.ctx.take_supplied_guard_code() {
                self.pending_guard_code = Some(code);
            }
        }

        let prefer_password = self.pending_guard_code.is_some() && self.settings.password.is_some();
        if let Some(key) = self.credentials.login_key().filter(|_| !prefer_password) {
            logon.login_key = Some(key.to_string());
            return Ok((logon, true));
        }

        let password = self
            .settings
            .password
            .clone()
            .ok_or(AuthError::MissingCredential("password (no stored login key)"))?;
        logon.password = Some(password);

        let code = match self.pending_guard_code.take() {
            Some(code) => Some(code),
            None => self.next_guard_code().await?,
        };
        if let Some(code) = code {
            match self.guard_kind {
                GuardKind::Email if !self.guard.has_secret() => logon.auth_code = Some(code),
                _ => logon.two_factor_code = Some(code),
            }
        }

        Ok((logon, false))
    }

    /// TOTP code, else the env one-shot code, else the one stored in the
    /// credential file.
    async fn next_guard_code(&mut self) -> Result<Option<String>, AuthError> {
        if let Some(code) = self.guard.next_code(unix_timestamp())? {
            return Ok(Some(code));
        }
        self.credentials.take_guard_code().await
    }

    fn outgoing(&self, live: &LiveSession, packet: Packet) -> Packet {
        match live.steam_id {
            Some(steam_id) => packet.with_session(steam_id.as_u64(), live.session_id),
            None => packet,
        }
    }

    async fn send_gc_hello<S>(&self, connection: &mut CmConnection<S>, live: &LiveSession) -> Result<(), String>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.ctx.state() == SessionState::Ready {
            return Ok(());
        }
        debug!("Sending GC hello");
        let hello = GcMessage::from_message(CLIENT_HELLO, &ClientHello { version: Some(0) });
        let packet = self.gc_packet(live, &hello);
        connection.send(packet).await.map_err(|e| e.to_string())
    }

    fn gc_packet(&self, live: &LiveSession, message: &GcMessage) -> Packet {
        let envelope = GcClientMessage {
            appid: Some(self.ctx.app_id()),
            msgtype: Some(message.msg_type | PROTO_MASK),
            payload: Some(message.to_payload()),
            ..Default::default()
        };
        self.outgoing(live, Packet::from_message(emsg::CLIENT_TO_GC, &envelope))
            .with_routing_app(self.ctx.app_id())
    }

    // ========================================================================
    // Outbound commands
    // ========================================================================

    async fn handle_command<S>(
        &mut self,
        connection: &mut CmConnection<S>,
        live: &LiveSession,
        command: SessionCommand,
    ) -> Option<DisconnectReason>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let job_id = command.job_id();
        let packet = match command {
            SessionCommand::Relogin => {
                info!("Relogin requested, dropping connection");
                return Some(DisconnectReason::RetryNow);
            }
            SessionCommand::LogOff => {
                let log_off = self.outgoing(live, Packet::from_message(emsg::CLIENT_LOG_OFF, &ClientLogOff {}));
                if let Err(e) = connection.send(log_off).await {
                    warn!(error = %e, "Failed to send logoff");
                }
                return Some(DisconnectReason::LogOffRequested);
            }
            SessionCommand::RequestRichPresence { steam_ids } => {
                if self.ctx.state() != SessionState::Ready {
                    debug!(count = steam_ids.len(), "Dropping rich presence request, session not ready");
                    return None;
                }
                let request = ClientRichPresenceRequest {
                    steamid_request: steam_ids.iter().map(SteamId::as_u64).collect(),
                };
                self.outgoing(live, Packet::from_message(emsg::CLIENT_RICH_PRESENCE_REQUEST, &request))
                    .with_routing_app(self.ctx.app_id())
            }
            SessionCommand::AddFriend { steam_id, job_id } => {
                let request = ClientAddFriend {
                    steamid_to_add: Some(steam_id.as_u64()),
                    ..Default::default()
                };
                self.outgoing(live, Packet::from_message(emsg::CLIENT_ADD_FRIEND, &request))
                    .with_job_source(job_id)
            }
            SessionCommand::CreateInviteToken {
                limit,
                duration,
                job_id,
            } => {
                let request = CreateFriendInviteTokenRequest {
                    invite_limit: Some(limit),
                    invite_duration: Some(duration),
                    invite_note: None,
                };
                self.outgoing(live, Packet::from_message(emsg::SERVICE_METHOD_CALL_FROM_CLIENT, &request))
                    .with_target_job_name(emsg::CREATE_FRIEND_INVITE_TOKEN_METHOD)
                    .with_job_source(job_id)
            }
            SessionCommand::SendGc {
                msg_type,
                body,
                job_id,
            } => {
                let message = GcMessage::new(msg_type, body).with_job_source(job_id);
                debug!(job_id, msg = gc_msg_name(msg_type), "Sending GC request");
                self.gc_packet(live, &message)
            }
        };

        if let Err(e) = connection.send(packet).await {
            if let Some(job_id) = job_id {
                self.ctx.fail_job(job_id, SteamError::Disconnected);
            }
            return Some(DisconnectReason::Error(e.to_string()));
        }
        None
    }

    // ========================================================================
    // Inbound packets
    // ========================================================================

    async fn handle_packet<S>(
        &mut self,
        connection: &mut CmConnection<S>,
        live: &mut LiveSession,
        packet: Packet,
    ) -> Result<Option<DisconnectReason>, AuthError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut queue = VecDeque::from([packet]);

        while let Some(packet) = queue.pop_front() {
            if packet.emsg == emsg::MULTI {
                match unpack_multi(&packet) {
                    Ok(inner) => queue.extend(inner),
                    Err(e) => return Ok(Some(DisconnectReason::Error(e.to_string()))),
                }
                continue;
            }

            let reason = match packet.emsg {
                emsg::CLIENT_LOG_ON_RESPONSE => self.on_logon_response(connection, live, &packet).await?,
                emsg::CLIENT_NEW_LOGIN_KEY => self.on_new_login_key(connection, live, &packet).await?,
                emsg::CLIENT_LOGGED_OFF => {
                    let result = decode_or_warn::<ClientLoggedOff>(&packet, "CMsgClientLoggedOff")
                        .and_then(|m| m.eresult)
                        .map(EResult)
                        .unwrap_or(EResult::FAIL);
                    warn!(result = %result, "Logged off by Steam");
                    Some(DisconnectReason::LoggedOff(result))
                }
                emsg::CLIENT_FROM_GC => {
                    self.on_gc_message(live, &packet);
                    None
                }
                emsg::CLIENT_ADD_FRIEND_RESPONSE => {
                    self.on_add_friend_response(&packet);
                    None
                }
                emsg::SERVICE_METHOD_RESPONSE => {
                    self.on_service_method_response(&packet);
                    None
                }
                emsg::CLIENT_RICH_PRESENCE_INFO => {
                    self.on_rich_presence(&packet);
                    None
                }
                emsg::CLIENT_FRIENDS_LIST => {
                    self.on_friends_list(&packet);
                    None
                }
                other => {
                    debug!(emsg = other, name = emsg::emsg_name(other), "Ignoring message");
                    None
                }
            };

            if reason.is_some() {
                return Ok(reason);
            }
        }

        Ok(None)
    }

    async fn on_logon_response<S>(
        &mut self,
        connection: &mut CmConnection<S>,
        live: &mut LiveSession,
        packet: &Packet,
    ) -> Result<Option<DisconnectReason>, AuthError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(response) = decode_or_warn::<ClientLogonResponse>(packet, "CMsgClientLogonResponse") else {
            return Ok(Some(DisconnectReason::Error("malformed logon response".to_string())));
        };
        let result = response.eresult.map(EResult).unwrap_or(EResult::FAIL);

        match result {
            EResult::OK => {}
            EResult::ACCOUNT_LOGON_DENIED
            | EResult::ACCOUNT_LOGIN_DENIED_NEED_TWO_FACTOR
            | EResult::INVALID_LOGIN_AUTH_CODE
            | EResult::TWO_FACTOR_CODE_MISMATCH => {
                return self.on_guard_required(result).await.map(Some);
            }
            EResult::INVALID_PASSWORD if live.used_login_key => {
                warn!("Stored login key rejected, falling back to password");
                self.credentials.clear_login_key().await?;
                if self.settings.password.is_none() {
                    return Err(AuthError::MissingCredential("password (login key was rejected)"));
                }
                return Ok(Some(DisconnectReason::RetryNow));
            }
            transient if transient.is_transient() => {
                warn!(result = %transient, "Logon failed temporarily");
                return Ok(Some(DisconnectReason::Transient(transient)));
            }
            rejected => {
                error!(result = %rejected, "Logon rejected");
                return Err(AuthError::Rejected { result: rejected });
            }
        }

        let steam_id = packet
            .header
            .steamid
            .or(response.client_supplied_steamid)
            .filter(|&id| id != 0)
            .map(SteamId);
        live.steam_id = steam_id;
        live.session_id = packet.header.client_sessionid.unwrap_or(0);
        self.ctx.set_steam_id(steam_id);
        self.ctx.set_state(SessionState::LoggedOn);
        self.reconnect.reset();
        self.guard_attempts = 0;

        info!(steam_id = ?steam_id.map(|id| id.as_u64()), "Logged on to Steam");

        let heartbeat_secs = response
            .out_of_game_heartbeat_seconds
            .filter(|&s| s > 0)
            .map(|s| s as u64)
            .unwrap_or(DEFAULT_HEARTBEAT_SECS);
        live.heartbeat = Some(periodic(Duration::from_secs(heartbeat_secs), false));

        let games = ClientGamesPlayed {
            games_played: vec![GamePlayed {
                game_id: Some(self.ctx.app_id() as u64),
            }],
        };
        let games_packet = self.outgoing(live, Packet::from_message(emsg::CLIENT_GAMES_PLAYED, &games));
        if let Err(e) = connection.send(games_packet).await {
            return Ok(Some(DisconnectReason::Error(e.to_string())));
        }

        self.ctx.set_state(SessionState::HandshakingGc);
        live.gc_hello = Some(periodic(self.settings.gc_hello_interval, true));
        Ok(None)
    }

    async fn on_guard_required(&mut self, result: EResult) -> Result<DisconnectReason, AuthError> {
        let code_was_wrong = matches!(
            result,
            EResult::INVALID_LOGIN_AUTH_CODE | EResult::TWO_FACTOR_CODE_MISMATCH
        );
        if self.guard_attempts >= MAX_GUARD_ATTEMPTS {
            return Err(AuthError::GuardCodeRejected { result });
        }
        self.guard_attempts += 1;

        self.guard_kind = match result {
            EResult::ACCOUNT_LOGON_DENIED | EResult::INVALID_LOGIN_AUTH_CODE => GuardKind::Email,
            _ => GuardKind::TwoFactor,
        };

        // Only an operator-supplied code may follow a rejected one
        let code = match self.ctx.take_supplied_guard_code() {
            Some(code) => Some(code),
            None if code_was_wrong => None,
            None => self.next_guard_code().await?,
        };

        match code {
            Some(code) => {
                info!(result = %result, "Steam Guard code required, retrying with code");
                self.pending_guard_code = Some(code);
                Ok(DisconnectReason::RetryNow)
            }
            None if code_was_wrong => {
                error!(result = %result, "Steam Guard code rejected");
                Err(AuthError::GuardCodeRejected { result })
            }
            None => Err(AuthError::GuardCodeUnavailable),
        }
    }

    async fn on_new_login_key<S>(
        &mut self,
        connection: &mut CmConnection<S>,
        live: &LiveSession,
        packet: &Packet,
    ) -> Result<Option<DisconnectReason>, AuthError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Some(message) = decode_or_warn::<ClientNewLoginKey>(packet, "CMsgClientNewLoginKey") else {
            return Ok(None);
        };
        let Some(key) = message.login_key.filter(|k| !k.is_empty()) else {
            return Ok(None);
        };

        // Persist first: acknowledging makes the old key invalid.
        self.credentials.persist_login_key(&key).await?;

        let accepted = ClientNewLoginKeyAccepted {
            unique_id: message.unique_id,
        };
        let packet = self.outgoing(live, Packet::from_message(emsg::CLIENT_NEW_LOGIN_KEY_ACCEPTED, &accepted));
        if let Err(e) = connection.send(packet).await {
            return Ok(Some(DisconnectReason::Error(e.to_string())));
        }
        Ok(None)
    }

    fn on_gc_message(&self, live: &mut LiveSession, packet: &Packet) {
        let Some(envelope) = decode_or_warn::<GcClientMessage>(packet, "CMsgGCClient") else {
            return;
        };
        if envelope.appid != Some(self.ctx.app_id()) {
            debug!(appid = ?envelope.appid, "Ignoring GC message for another app");
            return;
        }

        let msg_type = envelope.msgtype.unwrap_or(0);
        let message = match GcMessage::from_payload(msg_type, envelope.payload.as_deref().unwrap_or(&[])) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, msg_type = msg_type & !PROTO_MASK, "Malformed GC message");
                return;
            }
        };

        match message.msg_type {
            CLIENT_WELCOME => {
                if self.ctx.state() != SessionState::Ready {
                    info!("GC welcome received, session ready");
                }
                live.gc_hello = None;
                self.ctx.set_state(SessionState::Ready);
            }
            CLIENT_CONNECTION_STATUS => {
                let status = message
                    .decode_body::<ConnectionStatus>("CMsgConnectionStatus")
                    .ok()
                    .and_then(|s| s.status)
                    .unwrap_or(STATUS_HAVE_SESSION);
                if status != STATUS_HAVE_SESSION {
                    warn!(status, "GC session lost, resuming handshake");
                    self.ctx.set_state(SessionState::HandshakingGc);
                    live.gc_hello = Some(periodic(self.settings.gc_hello_interval, true));
                }
            }
            msg_type => match message.target_job() {
                Some(job_id) => {
                    let response = JobResponse {
                        eresult: message.header.result(),
                        body: message.body.clone(),
                    };
                    if !self.ctx.complete_job(job_id, ResponseKind::Gc(msg_type), response) {
                        debug!(job_id, msg = gc_msg_name(msg_type), "Unmatched GC response");
                    }
                }
                None => debug!(msg_type, msg = gc_msg_name(msg_type), "Ignoring GC message"),
            },
        }
    }

    fn on_add_friend_response(&self, packet: &Packet) {
        let Some(response) = decode_or_warn::<ClientAddFriendResponse>(packet, "CMsgClientAddFriendResponse") else {
            return;
        };
        let Some(job_id) = packet.header.target_job() else {
            debug!("Add-friend response without job id");
            return;
        };
        let eresult = response.eresult.map(EResult).unwrap_or(EResult::OK);
        self.ctx.complete_job(
            job_id,
            ResponseKind::AddFriend,
            JobResponse {
                eresult,
                body: packet.body.clone(),
            },
        );
    }

    fn on_service_method_response(&self, packet: &Packet) {
        let Some(job_id) = packet.header.target_job() else {
            debug!("Service method response without job id");
            return;
        };
        self.ctx.complete_job(
            job_id,
            ResponseKind::ServiceMethod,
            JobResponse {
                eresult: packet.header.result(),
                body: packet.body.clone(),
            },
        );
    }

    fn on_rich_presence(&self, packet: &Packet) {
        let Some(info) = decode_or_warn::<ClientRichPresenceInfo>(packet, "CMsgClientRichPresenceInfo") else {
            return;
        };
        let app_id = packet.header.routing_appid.unwrap_or(self.ctx.app_id());

        for entry in info.rich_presence {
            let Some(steam_id) = entry.steamid_user.map(SteamId) else {
                continue;
            };
            let attributes = match parse_binary_kv(entry.rich_presence_kv.as_deref().unwrap_or(&[])) {
                Ok(attributes) => attributes,
                Err(e) => {
                    warn!(steam_id = steam_id.as_u64(), error = %e, "Malformed rich presence");
                    continue;
                }
            };
            self.publish(SteamEvent::PresenceUpdate(PresenceUpdate {
                steam_id,
                app_id,
                attributes,
            }));
        }
    }

    fn on_friends_list(&self, packet: &Packet) {
        let Some(list) = decode_or_warn::<ClientFriendsList>(packet, "CMsgClientFriendsList") else {
            return;
        };
        for friend in list.friends {
            let Some(steam_id) = friend.ulfriendid.map(SteamId) else {
                continue;
            };
            let relationship = FriendRelationship::from_id(friend.efriendrelationship.unwrap_or(0));
            self.publish(SteamEvent::RelationshipChanged {
                steam_id,
                relationship,
            });
        }
    }

    fn publish(&self, event: SteamEvent) {
        if self.events.send(event).is_err() {
            warn!("Event dispatcher is gone, dropping event");
        }
    }
}

fn decode_or_warn<M: prost::Message + Default>(packet: &Packet, name: &'static str) -> Option<M> {
    match packet.decode_body::<M>(name) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(error = %e, "Dropping malformed message");
            None
        }
    }
}

fn periodic(period: Duration, immediate: bool) -> Interval {
    let start = if immediate { Instant::now() } else { Instant::now() + period };
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Tick an optional interval; never resolves when unset.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::cm::keyvalues::{encode_string_kv, KvValue};
    use crate::protocol::cm::messages::{FriendEntry, RichPresenceEntry};
    use crate::protocol::gc::messages::UPDATE_HERO_BUILD_RESPONSE;
    use tokio::io::DuplexStream;

    const BOT_ID: u64 = 76561198000000001;
    const APP_ID: u32 = 1422450;

    struct Fixture {
        ctx: Arc<SessionContext>,
        events: mpsc::UnboundedReceiver<SteamEvent>,
        shutdown_tx: watch::Sender<bool>,
        dir: tempfile::TempDir,
    }

    async fn harness(password: Option<&str>, credential_json: Option<&str>) -> (SessionSupervisor, Fixture) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        if let Some(json) = credential_json {
            std::fs::write(&path, json).unwrap();
        }
        let credentials = CredentialStore::load(&path).await.unwrap();

        let (ctx, commands) = SessionContext::new(APP_ID);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let settings = SessionSettings {
            account_name: "bridgebot".to_string(),
            password: password.map(String::from),
            cm_servers: Vec::new(),
            reconnect_delay: Duration::from_secs(10),
            gc_hello_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            shared_secret: None,
            guard_code: None,
        };
        let supervisor = SessionSupervisor::new(settings, ctx.clone(), commands, events_tx, credentials, shutdown_rx);

        (
            supervisor,
            Fixture {
                ctx,
                events,
                shutdown_tx,
                dir,
            },
        )
    }

    fn stored_credentials(fixture: &Fixture) -> String {
        std::fs::read_to_string(fixture.dir.path().join("creds.json")).unwrap()
    }

    async fn expect(server: &mut CmConnection<DuplexStream>, expected: u32) -> Packet {
        loop {
            let packet = server.next().await.unwrap().unwrap();
            if packet.emsg == emsg::CLIENT_HEART_BEAT && expected != emsg::CLIENT_HEART_BEAT {
                continue;
            }
            assert_eq!(packet.emsg, expected, "unexpected {}", emsg::emsg_name(packet.emsg));
            return packet;
        }
    }

    fn logon_response(result: EResult) -> Packet {
        let response = ClientLogonResponse {
            eresult: Some(result.0),
            out_of_game_heartbeat_seconds: Some(60),
            ..Default::default()
        };
        let mut packet = Packet::from_message(emsg::CLIENT_LOG_ON_RESPONSE, &response);
        if result.is_ok() {
            packet = packet.with_session(BOT_ID, 77);
        }
        packet
    }

    fn from_gc(message: GcMessage) -> Packet {
        let envelope = GcClientMessage {
            appid: Some(APP_ID),
            msgtype: Some(message.msg_type | PROTO_MASK),
            payload: Some(message.to_payload()),
            ..Default::default()
        };
        Packet::from_message(emsg::CLIENT_FROM_GC, &envelope)
    }

    fn gc_of(packet: &Packet) -> GcMessage {
        let envelope: GcClientMessage = packet.decode_body("CMsgGCClient").unwrap();
        GcMessage::from_payload(envelope.msgtype.unwrap(), envelope.payload.as_deref().unwrap()).unwrap()
    }

    async fn wait_ready(ctx: &SessionContext) {
        let mut state = ctx.subscribe();
        state.wait_for(|s| *s == SessionState::Ready).await.unwrap();
    }

    #[tokio::test]
    async fn test_logon_handshake_and_gc_round_trip() {
        let (mut supervisor, fixture) = harness(Some("hunter2"), None).await;
        let Fixture {
            ctx,
            mut events,
            shutdown_tx,
            dir: _dir,
        } = fixture;

        let (client, server) = tokio::io::duplex(64 * 1024);
        let client_task = tokio::spawn(async move {
            let reason = supervisor.handle_connection(client).await;
            (supervisor, reason)
        });
        let mut server = new_cm_connection(server);

        // Logon with password, no key stored
        let logon: ClientLogon = expect(&mut server, emsg::CLIENT_LOGON).await.decode_body("logon").unwrap();
        assert_eq!(logon.account_name.as_deref(), Some("bridgebot"));
        assert_eq!(logon.password.as_deref(), Some("hunter2"));
        assert_eq!(logon.login_key, None);

        server.send(logon_response(EResult::OK)).await.unwrap();

        // Playing the app, then GC hello
        let games: ClientGamesPlayed = expect(&mut server, emsg::CLIENT_GAMES_PLAYED).await.decode_body("games").unwrap();
        assert_eq!(games.games_played[0].game_id, Some(APP_ID as u64));
        let hello = expect(&mut server, emsg::CLIENT_TO_GC).await;
        assert_eq!(hello.header.steamid, Some(BOT_ID));
        assert_eq!(gc_of(&hello).msg_type, CLIENT_HELLO);
        assert!(!ctx.is_ready());

        server.send(from_gc(GcMessage::new(CLIENT_WELCOME, Vec::new()))).await.unwrap();
        wait_ready(&ctx).await;
        assert_eq!(ctx.steam_id(), Some(SteamId(BOT_ID)));

        // GC request correlated by job id; a wrong-typed reply is not attributed
        let request_ctx = ctx.clone();
        let request = tokio::spawn(async move {
            request_ctx
                .gc_request(9193, vec![0x0A, 0x00], UPDATE_HERO_BUILD_RESPONSE, Duration::from_secs(5))
                .await
        });
        let sent = gc_of(&expect(&mut server, emsg::CLIENT_TO_GC).await);
        assert_eq!(sent.msg_type, 9193);
        let job_id = sent.header.jobid_source.unwrap();

        server
            .send(from_gc(GcMessage::new(9196, vec![1]).with_job_target(job_id)))
            .await
            .unwrap();
        server
            .send(from_gc(GcMessage::new(UPDATE_HERO_BUILD_RESPONSE, vec![2]).with_job_target(job_id)))
            .await
            .unwrap();
        assert_eq!(request.await.unwrap().unwrap().as_ref(), &[2]);

        // Rich presence and relationship events
        let info = ClientRichPresenceInfo {
            rich_presence: vec![RichPresenceEntry {
                steamid_user: Some(42),
                rich_presence_kv: Some(encode_string_kv("RP", &[("status", "In Lobby")])),
            }],
        };
        server
            .send(Packet::from_message(emsg::CLIENT_RICH_PRESENCE_INFO, &info).with_routing_app(APP_ID))
            .await
            .unwrap();
        let friends = ClientFriendsList {
            bincremental: Some(true),
            friends: vec![FriendEntry {
                ulfriendid: Some(43),
                efriendrelationship: Some(2),
            }],
        };
        server
            .send(Packet::from_message(emsg::CLIENT_FRIENDS_LIST, &friends))
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            SteamEvent::PresenceUpdate(update) => {
                assert_eq!(update.steam_id, SteamId(42));
                assert_eq!(update.app_id, APP_ID);
                assert_eq!(
                    update.attributes,
                    vec![("status".to_string(), KvValue::String("In Lobby".to_string()))]
                );
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            events.recv().await.unwrap(),
            SteamEvent::RelationshipChanged {
                steam_id: SteamId(43),
                relationship: FriendRelationship::RequestRecipient,
            }
        );

        // Graceful shutdown logs off
        shutdown_tx.send(true).unwrap();
        expect(&mut server, emsg::CLIENT_LOG_OFF).await;
        let (_supervisor, reason) = client_task.await.unwrap();
        assert_eq!(reason.unwrap(), DisconnectReason::Shutdown);
    }

    #[tokio::test]
    async fn test_login_key_persisted_before_ack() {
        let (mut supervisor, fixture) = harness(Some("hunter2"), None).await;

        let (client, server) = tokio::io::duplex(64 * 1024);
        let client_task = tokio::spawn(async move { supervisor.handle_connection(client).await });
        let mut server = new_cm_connection(server);

        expect(&mut server, emsg::CLIENT_LOGON).await;
        server.send(logon_response(EResult::OK)).await.unwrap();
        expect(&mut server, emsg::CLIENT_GAMES_PLAYED).await;

        let new_key = ClientNewLoginKey {
            unique_id: Some(9),
            login_key: Some("fresh-key".to_string()),
        };
        server
            .send(Packet::from_message(emsg::CLIENT_NEW_LOGIN_KEY, &new_key))
            .await
            .unwrap();

        // Skip GC hellos until the acknowledgement arrives
        let ack = loop {
            let packet = server.next().await.unwrap().unwrap();
            if packet.emsg == emsg::CLIENT_NEW_LOGIN_KEY_ACCEPTED {
                break packet;
            }
        };
        let ack: ClientNewLoginKeyAccepted = ack.decode_body("ack").unwrap();
        assert_eq!(ack.unique_id, Some(9));

        assert!(stored_credentials(&fixture).contains("fresh-key"));

        // Steam logs us off: a disconnect, not an auth failure
        let logged_off = ClientLoggedOff {
            eresult: Some(EResult::LOGGED_IN_ELSEWHERE.0),
        };
        server
            .send(Packet::from_message(emsg::CLIENT_LOGGED_OFF, &logged_off))
            .await
            .unwrap();
        assert_eq!(
            client_task.await.unwrap().unwrap(),
            DisconnectReason::LoggedOff(EResult::LOGGED_IN_ELSEWHERE)
        );
    }

    #[tokio::test]
    async fn test_stored_key_has_priority() {
        let (mut supervisor, _fixture) = harness(Some("hunter2"), Some(r#"{"login_key":"stored"}"#)).await;
        let (logon, used_key) = supervisor.build_logon().await.unwrap();
        assert!(used_key);
        assert_eq!(logon.login_key.as_deref(), Some("stored"));
        assert_eq!(logon.password, None);
    }

    #[tokio::test]
    async fn test_rejected_key_falls_back_to_password() {
        let (supervisor, fixture) = harness(Some("hunter2"), Some(r#"{"login_key":"stale"}"#)).await;

        let (client, server) = tokio::io::duplex(64 * 1024);
        let client_task = tokio::spawn(async move {
            let mut supervisor = supervisor;
            let reason = supervisor.handle_connection(client).await;
            (supervisor, reason)
        });
        let mut server = new_cm_connection(server);

        let logon: ClientLogon = expect(&mut server, emsg::CLIENT_LOGON).await.decode_body("logon").unwrap();
        assert_eq!(logon.login_key.as_deref(), Some("stale"));
        server.send(logon_response(EResult::INVALID_PASSWORD)).await.unwrap();

        let (mut supervisor, reason) = client_task.await.unwrap();
        assert_eq!(reason.unwrap(), DisconnectReason::RetryNow);

        assert!(!stored_credentials(&fixture).contains("stale"));

        let (logon, used_key) = supervisor.build_logon().await.unwrap();
        assert!(!used_key);
        assert_eq!(logon.password.as_deref(), Some("hunter2"));
    }

    #[tokio::test]
    async fn test_rejected_key_without_password_is_fatal() {
        let (mut supervisor, _fixture) = harness(None, Some(r#"{"login_key":"stale"}"#)).await;

        let (client, server) = tokio::io::duplex(64 * 1024);
        let client_task = tokio::spawn(async move { supervisor.handle_connection(client).await });
        let mut server = new_cm_connection(server);

        expect(&mut server, emsg::CLIENT_LOGON).await;
        server.send(logon_response(EResult::INVALID_PASSWORD)).await.unwrap();

        assert!(matches!(
            client_task.await.unwrap(),
            Err(AuthError::MissingCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_guard_required_without_code_is_fatal() {
        let (mut supervisor, _fixture) = harness(Some("hunter2"), None).await;

        let (client, server) = tokio::io::duplex(64 * 1024);
        let client_task = tokio::spawn(async move { supervisor.handle_connection(client).await });
        let mut server = new_cm_connection(server);

        expect(&mut server, emsg::CLIENT_LOGON).await;
        server
            .send(logon_response(EResult::ACCOUNT_LOGIN_DENIED_NEED_TWO_FACTOR))
            .await
            .unwrap();

        assert!(matches!(
            client_task.await.unwrap(),
            Err(AuthError::GuardCodeUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_guard_required_uses_one_shot_code_once() {
        let (mut supervisor, fixture) = harness(Some("hunter2"), Some(r#"{"guard_code":"ABCDE"}"#)).await;

        // The stored one-shot code goes out with the first password logon
        let (logon, _) = supervisor.build_logon().await.unwrap();
        assert_eq!(logon.two_factor_code.as_deref(), Some("ABCDE"));

        // Email prompt afterwards: nothing left to offer
        let result = supervisor.on_guard_required(EResult::ACCOUNT_LOGON_DENIED).await;
        assert!(matches!(result, Err(AuthError::GuardCodeUnavailable)));
        assert!(!stored_credentials(&fixture).contains("ABCDE"));
    }

    #[tokio::test]
    async fn test_supplied_guard_code_used_after_prompt() {
        let (mut supervisor, fixture) = harness(Some("hunter2"), None).await;
        let ctx = fixture.ctx.clone();

        ctx.supply_guard_code("QWERT");
        let reason = supervisor.on_guard_required(EResult::ACCOUNT_LOGON_DENIED).await.unwrap();
        assert_eq!(reason, DisconnectReason::RetryNow);

        let (logon, _) = supervisor.build_logon().await.unwrap();
        assert_eq!(logon.auth_code.as_deref(), Some("QWERT"));
        assert_eq!(logon.two_factor_code, None);
    }

    #[tokio::test]
    async fn test_rejected_totp_code_is_fatal() {
        let (mut supervisor, _fixture) =
            harness(Some("hunter2"), Some(r#"{"shared_secret":"MTIzNDU2Nzg5MDEyMzQ1Njc4OTA="}"#)).await;

        let reason = supervisor
            .on_guard_required(EResult::ACCOUNT_LOGIN_DENIED_NEED_TWO_FACTOR)
            .await
            .unwrap();
        assert_eq!(reason, DisconnectReason::RetryNow);

        // Same time step, same code: no second try
        let result = supervisor.on_guard_required(EResult::TWO_FACTOR_CODE_MISMATCH).await;
        assert!(matches!(
            result,
            Err(AuthError::GuardCodeRejected { result }) if result == EResult::TWO_FACTOR_CODE_MISMATCH
        ));
    }

    #[tokio::test]
    async fn test_rejected_code_retried_only_with_supplied_code() {
        let (mut supervisor, fixture) = harness(Some("hunter2"), None).await;

        fixture.ctx.supply_guard_code("QWERT");
        let reason = supervisor.on_guard_required(EResult::INVALID_LOGIN_AUTH_CODE).await.unwrap();
        assert_eq!(reason, DisconnectReason::RetryNow);

        let result = supervisor.on_guard_required(EResult::INVALID_LOGIN_AUTH_CODE).await;
        assert!(matches!(result, Err(AuthError::GuardCodeRejected { .. })));
    }

    #[tokio::test]
    async fn test_transient_logon_result_is_not_fatal() {
        let (mut supervisor, _fixture) = harness(Some("hunter2"), None).await;

        let (client, server) = tokio::io::duplex(64 * 1024);
        let client_task = tokio::spawn(async move { supervisor.handle_connection(client).await });
        let mut server = new_cm_connection(server);

        expect(&mut server, emsg::CLIENT_LOGON).await;
        server.send(logon_response(EResult::TRY_ANOTHER_CM)).await.unwrap();

        assert_eq!(
            client_task.await.unwrap().unwrap(),
            DisconnectReason::Transient(EResult::TRY_ANOTHER_CM)
        );
    }

    #[tokio::test]
    async fn test_bad_password_is_fatal() {
        let (mut supervisor, _fixture) = harness(Some("wrong"), None).await;

        let (client, server) = tokio::io::duplex(64 * 1024);
        let client_task = tokio::spawn(async move { supervisor.handle_connection(client).await });
        let mut server = new_cm_connection(server);

        expect(&mut server, emsg::CLIENT_LOGON).await;
        server.send(logon_response(EResult::INVALID_PASSWORD)).await.unwrap();

        assert!(matches!(
            client_task.await.unwrap(),
            Err(AuthError::Rejected { result }) if result == EResult::INVALID_PASSWORD
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_disconnect_schedules_one_reconnect() {
        let (mut supervisor, fixture) = harness(Some("hunter2"), None).await;
        let ctx = fixture.ctx.clone();
        ctx.set_state(SessionState::Ready);

        supervisor.on_disconnect(DisconnectReason::LoggedOff(EResult::FAIL));
        supervisor.on_disconnect(DisconnectReason::Closed);

        assert_eq!(supervisor.reconnects_scheduled(), 1);
        assert_eq!(ctx.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_offline_relogin_schedules_immediately() {
        let (mut supervisor, _fixture) = harness(Some("hunter2"), None).await;
        supervisor.handle_offline_command(SessionCommand::LogOff);
        supervisor.handle_offline_command(SessionCommand::Relogin);
        assert_eq!(supervisor.reconnects_scheduled(), 1);
    }
}
