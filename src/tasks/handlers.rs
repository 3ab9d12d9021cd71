//! Task type dispatch.
//!
//! Pure per-task logic, separated from the polling loop in
//! [`super::processor`]. A handler either produces the result JSON, asks for
//! the task to be skipped (session not ready) or fails with a [`TaskError`].

use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::common::error::{SteamError, TaskError};
use crate::protocol::gc::messages::{
    FindHeroBuilds, FindHeroBuildsResponse, HeroBuild, UpdateHeroBuild, UpdateHeroBuildResponse,
    FIND_HERO_BUILDS, FIND_HERO_BUILDS_RESPONSE, HERO_BUILD_SUCCESS, UPDATE_HERO_BUILD,
    UPDATE_HERO_BUILD_RESPONSE,
};
use crate::session::SessionContext;

/// Task type names written by the controller.
pub mod task_types {
    pub const AUTH_STATUS: &str = "AUTH_STATUS";
    pub const AUTH_LOGIN: &str = "AUTH_LOGIN";
    pub const AUTH_GUARD_CODE: &str = "AUTH_GUARD_CODE";
    pub const AUTH_LOGOUT: &str = "AUTH_LOGOUT";
    pub const BUILD_PUBLISH: &str = "BUILD_PUBLISH";
    pub const GC_SEARCH_BUILDS: &str = "GC_SEARCH_BUILDS";
}

/// What the processor should do with a claimed task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Finished; store the result.
    Done(Value),
    /// Session not ready; release without consuming an attempt.
    Skip,
}

#[derive(Debug, Deserialize)]
struct GuardCodePayload {
    code: String,
}

pub struct TaskHandler {
    ctx: Arc<SessionContext>,
    gc_timeout: Duration,
}

impl TaskHandler {
    pub fn new(ctx: Arc<SessionContext>, gc_timeout: Duration) -> Self {
        Self { ctx, gc_timeout }
    }

    pub async fn handle(&self, task_type: &str, payload: Option<&str>) -> Result<TaskOutcome, TaskError> {
        match task_type {
            task_types::AUTH_STATUS => Ok(TaskOutcome::Done(self.auth_status())),
            task_types::AUTH_LOGIN => {
                info!("Login requested by task");
                self.ctx.request_relogin();
                Ok(TaskOutcome::Done(json!({ "requested": true })))
            }
            task_types::AUTH_GUARD_CODE => {
                let payload: GuardCodePayload = parse_payload(payload)?;
                if payload.code.trim().is_empty() {
                    return Err(TaskError::InvalidPayload("guard code is empty".to_string()));
                }
                info!("Guard code supplied by task");
                self.ctx.supply_guard_code(&payload.code);
                Ok(TaskOutcome::Done(json!({ "accepted": true })))
            }
            task_types::AUTH_LOGOUT => {
                info!("Logoff requested by task");
                self.ctx.log_off();
                Ok(TaskOutcome::Done(json!({ "requested": true })))
            }
            task_types::BUILD_PUBLISH => {
                let build: HeroBuild = parse_payload(payload)?;
                self.publish_build(build).await
            }
            task_types::GC_SEARCH_BUILDS => {
                let query: FindHeroBuilds = parse_payload(payload)?;
                self.search_builds(query).await
            }
            other => Err(TaskError::UnknownType(other.to_string())),
        }
    }

    fn auth_status(&self) -> Value {
        json!({
            "state": self.ctx.state().as_str(),
            "ready": self.ctx.is_ready(),
            "steam_id": self.ctx.steam_id().map(|id| id.to_string()),
        })
    }

    async fn publish_build(&self, build: HeroBuild) -> Result<TaskOutcome, TaskError> {
        let request = UpdateHeroBuild {
            hero_build: Some(build),
        };
        let Some(body) = self
            .gc_round_trip(UPDATE_HERO_BUILD, request.encode_to_vec(), UPDATE_HERO_BUILD_RESPONSE)
            .await?
        else {
            return Ok(TaskOutcome::Skip);
        };

        let response = UpdateHeroBuildResponse::decode(body.as_slice())
            .map_err(|e| TaskError::Steam(SteamError::Protocol(e.to_string())))?;
        let result = response.result.unwrap_or(0);
        if result != HERO_BUILD_SUCCESS {
            return Err(TaskError::GcRejected(result));
        }

        info!(
            hero_build_id = ?response.hero_build_id,
            version = ?response.version,
            "Hero build published"
        );
        Ok(TaskOutcome::Done(json!({
            "hero_build_id": response.hero_build_id,
            "version": response.version,
        })))
    }

    async fn search_builds(&self, query: FindHeroBuilds) -> Result<TaskOutcome, TaskError> {
        let Some(body) = self
            .gc_round_trip(FIND_HERO_BUILDS, query.encode_to_vec(), FIND_HERO_BUILDS_RESPONSE)
            .await?
        else {
            return Ok(TaskOutcome::Skip);
        };

        let response = FindHeroBuildsResponse::decode(body.as_slice())
            .map_err(|e| TaskError::Steam(SteamError::Protocol(e.to_string())))?;
        let result = response.response.unwrap_or(HERO_BUILD_SUCCESS);
        if result != HERO_BUILD_SUCCESS {
            return Err(TaskError::GcRejected(result));
        }

        let builds = serde_json::to_value(&response.results)
            .map_err(|e| TaskError::InvalidPayload(e.to_string()))?;
        Ok(TaskOutcome::Done(json!({ "builds": builds })))
    }

    /// Send a GC request and wait for the correlated response. `None` means
    /// the session was not ready and the task should be skipped.
    async fn gc_round_trip(
        &self,
        msg_type: u32,
        body: Vec<u8>,
        response_type: u32,
    ) -> Result<Option<Vec<u8>>, TaskError> {
        if !self.ctx.is_ready() {
            return Ok(None);
        }
        match self.ctx.gc_request(msg_type, body, response_type, self.gc_timeout).await {
            Ok(body) => Ok(Some(body.to_vec())),
            Err(SteamError::NotReady) => {
                debug!(msg_type, "Session dropped out of ready before the request was sent");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(payload: Option<&str>) -> Result<T, TaskError> {
    let raw = payload.ok_or_else(|| TaskError::InvalidPayload("payload is missing".to_string()))?;
    serde_json::from_str(raw).map_err(|e| TaskError::InvalidPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::context::{JobResponse, ResponseKind, SessionCommand, SessionState};
    use crate::common::types::{EResult, SteamId};
    use tokio::sync::mpsc;

    fn handler() -> (TaskHandler, Arc<SessionContext>, mpsc::UnboundedReceiver<SessionCommand>) {
        let (ctx, commands) = SessionContext::new(1422450);
        (TaskHandler::new(ctx.clone(), Duration::from_secs(5)), ctx, commands)
    }

    /// Answer the next GC request on `commands` with `body`.
    async fn respond_gc(
        ctx: Arc<SessionContext>,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        response_type: u32,
        body: Vec<u8>,
    ) -> (u32, Vec<u8>) {
        match commands.recv().await {
            Some(SessionCommand::SendGc {
                msg_type,
                body: sent,
                job_id,
            }) => {
                ctx.complete_job(
                    job_id,
                    ResponseKind::Gc(response_type),
                    JobResponse {
                        eresult: EResult::OK,
                        body: body.into(),
                    },
                );
                (msg_type, sent)
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_auth_status() {
        let (handler, ctx, _commands) = handler();
        ctx.set_state(SessionState::HandshakingGc);
        ctx.set_steam_id(Some(SteamId(76561198000000001)));

        let outcome = handler.handle(task_types::AUTH_STATUS, None).await.unwrap();
        assert_eq!(
            outcome,
            TaskOutcome::Done(json!({
                "state": "handshaking_gc",
                "ready": false,
                "steam_id": "76561198000000001",
            }))
        );
    }

    #[tokio::test]
    async fn test_guard_code_task() {
        let (handler, ctx, mut commands) = handler();

        let outcome = handler
            .handle(task_types::AUTH_GUARD_CODE, Some(r#"{"code":"F4K3C"}"#))
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Done(json!({ "accepted": true })));
        assert_eq!(ctx.take_supplied_guard_code().as_deref(), Some("F4K3C"));
        assert!(matches!(commands.recv().await, Some(SessionCommand::Relogin)));

        let err = handler.handle(task_types::AUTH_GUARD_CODE, Some("{}")).await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_unknown_type_is_permanent() {
        let (handler, _ctx, _commands) = handler();
        let err = handler.handle("MAKE_COFFEE", None).await.unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_publish_skips_when_not_ready() {
        let (handler, _ctx, _commands) = handler();
        let outcome = handler
            .handle(task_types::BUILD_PUBLISH, Some(r#"{"hero_id": 7}"#))
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Skip);
    }

    #[tokio::test]
    async fn test_publish_round_trip() {
        let (handler, ctx, commands) = handler();
        ctx.set_state(SessionState::Ready);

        let response = UpdateHeroBuildResponse {
            result: Some(HERO_BUILD_SUCCESS),
            hero_build_id: Some(501),
            version: Some(2),
        };
        let server = tokio::spawn(respond_gc(
            ctx.clone(),
            commands,
            UPDATE_HERO_BUILD_RESPONSE,
            response.encode_to_vec(),
        ));

        let outcome = handler
            .handle(task_types::BUILD_PUBLISH, Some(r#"{"hero_id": 7, "name": "Glass cannon"}"#))
            .await
            .unwrap();
        assert_eq!(outcome, TaskOutcome::Done(json!({ "hero_build_id": 501, "version": 2 })));

        let (msg_type, sent) = server.await.unwrap();
        assert_eq!(msg_type, UPDATE_HERO_BUILD);
        let request = UpdateHeroBuild::decode(sent.as_slice()).unwrap();
        assert_eq!(request.hero_build.unwrap().name.as_deref(), Some("Glass cannon"));
    }

    #[tokio::test]
    async fn test_publish_rejected_by_gc() {
        let (handler, ctx, commands) = handler();
        ctx.set_state(SessionState::Ready);

        let response = UpdateHeroBuildResponse {
            result: Some(4),
            ..Default::default()
        };
        tokio::spawn(respond_gc(
            ctx.clone(),
            commands,
            UPDATE_HERO_BUILD_RESPONSE,
            response.encode_to_vec(),
        ));

        let err = handler
            .handle(task_types::BUILD_PUBLISH, Some(r#"{"hero_id": 7}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::GcRejected(4)));
        assert!(!err.is_permanent());
    }

    #[tokio::test]
    async fn test_search_builds() {
        let (handler, ctx, commands) = handler();
        ctx.set_state(SessionState::Ready);

        let response = FindHeroBuildsResponse {
            response: Some(HERO_BUILD_SUCCESS),
            results: vec![crate::protocol::gc::messages::HeroBuildResult {
                hero_build: Some(HeroBuild {
                    hero_build_id: Some(9),
                    hero_id: Some(7),
                    ..Default::default()
                }),
                num_favorites: Some(3),
                ..Default::default()
            }],
        };
        tokio::spawn(respond_gc(
            ctx.clone(),
            commands,
            FIND_HERO_BUILDS_RESPONSE,
            response.encode_to_vec(),
        ));

        let outcome = handler
            .handle(task_types::GC_SEARCH_BUILDS, Some(r#"{"hero_id": 7}"#))
            .await
            .unwrap();
        let TaskOutcome::Done(result) = outcome else {
            panic!("search was skipped");
        };
        assert_eq!(result["builds"][0]["hero_build"]["hero_build_id"], 9);
        assert_eq!(result["builds"][0]["num_favorites"], 3);
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let (handler, ctx, _commands) = handler();
        ctx.set_state(SessionState::Ready);
        let err = handler
            .handle(task_types::BUILD_PUBLISH, Some("not json"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidPayload(_)));
    }
}
