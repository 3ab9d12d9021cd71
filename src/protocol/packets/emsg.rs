//! Steam CM message types (EMsg) used by the bridge.

// --- Framing ---
pub const MULTI: u32 = 1;

// --- Unified services ---
pub const SERVICE_METHOD_RESPONSE: u32 = 147;
pub const SERVICE_METHOD_CALL_FROM_CLIENT: u32 = 151;

// --- Session ---
pub const CLIENT_HEART_BEAT: u32 = 703;
pub const CLIENT_LOG_OFF: u32 = 706;
pub const CLIENT_LOG_ON_RESPONSE: u32 = 751;
pub const CLIENT_LOGGED_OFF: u32 = 757;
pub const CLIENT_LOGON: u32 = 5514;

// --- Login keys ---
pub const CLIENT_NEW_LOGIN_KEY: u32 = 5463;
pub const CLIENT_NEW_LOGIN_KEY_ACCEPTED: u32 = 5464;

// --- Friends ---
pub const CLIENT_FRIENDS_LIST: u32 = 767;
pub const CLIENT_ADD_FRIEND: u32 = 791;
pub const CLIENT_ADD_FRIEND_RESPONSE: u32 = 792;

// --- Apps / Game Coordinator ---
pub const CLIENT_GAMES_PLAYED: u32 = 5410;
pub const CLIENT_TO_GC: u32 = 5452;
pub const CLIENT_FROM_GC: u32 = 5453;

// --- Rich presence ---
pub const CLIENT_RICH_PRESENCE_REQUEST: u32 = 8103;
pub const CLIENT_RICH_PRESENCE_INFO: u32 = 8104;

/// Unified service method used to mint quick-invite tokens.
pub const CREATE_FRIEND_INVITE_TOKEN_METHOD: &str = "UserAccount.CreateFriendInviteToken#1";

/// Get a human-readable name for a message type.
pub fn emsg_name(emsg: u32) -> &'static str {
    match emsg {
        MULTI => "Multi",
        SERVICE_METHOD_RESPONSE => "ServiceMethodResponse",
        SERVICE_METHOD_CALL_FROM_CLIENT => "ServiceMethodCallFromClient",
        CLIENT_HEART_BEAT => "ClientHeartBeat",
        CLIENT_LOG_OFF => "ClientLogOff",
        CLIENT_LOG_ON_RESPONSE => "ClientLogOnResponse",
        CLIENT_LOGGED_OFF => "ClientLoggedOff",
        CLIENT_LOGON => "ClientLogon",
        CLIENT_NEW_LOGIN_KEY => "ClientNewLoginKey",
        CLIENT_NEW_LOGIN_KEY_ACCEPTED => "ClientNewLoginKeyAccepted",
        CLIENT_FRIENDS_LIST => "ClientFriendsList",
        CLIENT_ADD_FRIEND => "ClientAddFriend",
        CLIENT_ADD_FRIEND_RESPONSE => "ClientAddFriendResponse",
        CLIENT_GAMES_PLAYED => "ClientGamesPlayed",
        CLIENT_TO_GC => "ClientToGC",
        CLIENT_FROM_GC => "ClientFromGC",
        CLIENT_RICH_PRESENCE_REQUEST => "ClientRichPresenceRequest",
        CLIENT_RICH_PRESENCE_INFO => "ClientRichPresenceInfo",
        _ => "UNKNOWN",
    }
}
