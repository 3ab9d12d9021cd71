//! Game Coordinator message types and bodies.

use prost::Message;
use serde::{Deserialize, Serialize};

// --- Handshake ---
pub const CLIENT_WELCOME: u32 = 4004;
pub const CLIENT_HELLO: u32 = 4006;
pub const CLIENT_CONNECTION_STATUS: u32 = 4009;

// --- Hero builds ---
pub const UPDATE_HERO_BUILD: u32 = 9193;
pub const UPDATE_HERO_BUILD_RESPONSE: u32 = 9194;
pub const FIND_HERO_BUILDS: u32 = 9195;
pub const FIND_HERO_BUILDS_RESPONSE: u32 = 9196;

/// `GCConnectionStatus_HAVE_SESSION`.
pub const STATUS_HAVE_SESSION: i32 = 0;

/// Success value of the hero-build response enums.
pub const HERO_BUILD_SUCCESS: i32 = 1;

pub fn gc_msg_name(msg_type: u32) -> &'static str {
    match msg_type {
        CLIENT_WELCOME => "ClientWelcome",
        CLIENT_HELLO => "ClientHello",
        CLIENT_CONNECTION_STATUS => "ClientConnectionStatus",
        UPDATE_HERO_BUILD => "UpdateHeroBuild",
        UPDATE_HERO_BUILD_RESPONSE => "UpdateHeroBuildResponse",
        FIND_HERO_BUILDS => "FindHeroBuilds",
        FIND_HERO_BUILDS_RESPONSE => "FindHeroBuildsResponse",
        _ => "UNKNOWN",
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientHello {
    #[prost(uint32, optional, tag = "1")]
    pub version: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ClientWelcome {
    #[prost(uint32, optional, tag = "1")]
    pub version: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ConnectionStatus {
    #[prost(int32, optional, tag = "1")]
    pub status: Option<i32>,
}

/// A hero build as exchanged with the GC. Also the JSON shape of
/// `BUILD_PUBLISH` payloads and search results.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct HeroBuild {
    #[prost(uint32, optional, tag = "1")]
    pub hero_build_id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub hero_id: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub author_account_id: Option<u32>,
    #[prost(string, optional, tag = "4")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "5")]
    pub description: Option<String>,
    #[prost(uint32, optional, tag = "6")]
    pub language: Option<u32>,
    #[prost(uint32, optional, tag = "7")]
    pub version: Option<u32>,
    #[prost(uint32, optional, tag = "8")]
    pub origin_build_id: Option<u32>,
    #[prost(uint32, repeated, tag = "9")]
    #[serde(default)]
    pub tags: Vec<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdateHeroBuild {
    #[prost(message, optional, tag = "1")]
    pub hero_build: Option<HeroBuild>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdateHeroBuildResponse {
    #[prost(int32, optional, tag = "1")]
    pub result: Option<i32>,
    #[prost(uint32, optional, tag = "2")]
    pub hero_build_id: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub version: Option<u32>,
}

/// Search filter; also the JSON shape of `GC_SEARCH_BUILDS` payloads.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct FindHeroBuilds {
    #[prost(uint32, optional, tag = "1")]
    pub author_account_id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    pub hero_id: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub language: Option<u32>,
    #[prost(string, optional, tag = "4")]
    pub search_text: Option<String>,
}

#[derive(Clone, PartialEq, Message, Serialize)]
pub struct HeroBuildResult {
    #[prost(message, optional, tag = "1")]
    pub hero_build: Option<HeroBuild>,
    #[prost(uint32, optional, tag = "2")]
    pub num_favorites: Option<u32>,
    #[prost(uint32, optional, tag = "3")]
    pub num_ignores: Option<u32>,
    #[prost(uint32, optional, tag = "4")]
    pub num_reports: Option<u32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct FindHeroBuildsResponse {
    #[prost(int32, optional, tag = "1")]
    pub response: Option<i32>,
    #[prost(message, repeated, tag = "2")]
    pub results: Vec<HeroBuildResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hero_build_from_json() {
        let build: HeroBuild = serde_json::from_str(
            r#"{"hero_id": 7, "name": "Glass cannon", "language": 0, "tags": [3, 4]}"#,
        )
        .unwrap();
        assert_eq!(build.hero_id, Some(7));
        assert_eq!(build.hero_build_id, None);
        assert_eq!(build.tags, vec![3, 4]);

        let without_tags: HeroBuild = serde_json::from_str(r#"{"hero_id": 1}"#).unwrap();
        assert!(without_tags.tags.is_empty());
    }

    #[test]
    fn test_response_decodes() {
        let response = UpdateHeroBuildResponse {
            result: Some(HERO_BUILD_SUCCESS),
            hero_build_id: Some(501),
            version: Some(2),
        };
        let decoded = UpdateHeroBuildResponse::decode(response.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_names() {
        assert_eq!(gc_msg_name(CLIENT_WELCOME), "ClientWelcome");
        assert_eq!(gc_msg_name(1), "UNKNOWN");
    }
}
