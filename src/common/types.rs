//! Shared types used across the application.

use std::fmt;
use std::str::FromStr;

/// 64-bit Steam account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SteamId(pub u64);

/// Base of the individual-account universe (`76561197960265728`).
const INDIVIDUAL_BASE: u64 = 0x0110_0001_0000_0000;

impl SteamId {
    pub fn from_account_id(account_id: u32) -> Self {
        Self(INDIVIDUAL_BASE | account_id as u64)
    }

    /// Lower 32 bits: the account id used by GC messages and invite links.
    pub fn account_id(&self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SteamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SteamId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(SteamId)
    }
}

/// Steam result code carried in logon responses and message headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EResult(pub i32);

impl EResult {
    pub const OK: EResult = EResult(1);
    pub const FAIL: EResult = EResult(2);
    pub const NO_CONNECTION: EResult = EResult(3);
    pub const INVALID_PASSWORD: EResult = EResult(5);
    pub const LOGGED_IN_ELSEWHERE: EResult = EResult(6);
    pub const INVALID_PARAM: EResult = EResult(8);
    pub const BUSY: EResult = EResult(10);
    pub const ACCESS_DENIED: EResult = EResult(15);
    pub const TIMEOUT: EResult = EResult(16);
    pub const SERVICE_UNAVAILABLE: EResult = EResult(20);
    pub const LIMIT_EXCEEDED: EResult = EResult(25);
    pub const TRY_ANOTHER_CM: EResult = EResult(48);
    pub const ACCOUNT_LOGON_DENIED: EResult = EResult(63);
    pub const INVALID_LOGIN_AUTH_CODE: EResult = EResult(65);
    pub const RATE_LIMIT_EXCEEDED: EResult = EResult(84);
    pub const ACCOUNT_LOGIN_DENIED_NEED_TWO_FACTOR: EResult = EResult(85);
    pub const TWO_FACTOR_CODE_MISMATCH: EResult = EResult(88);

    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }

    /// Results that describe a temporary condition on the Steam side.
    pub fn is_transient(&self) -> bool {
        matches!(
            *self,
            Self::NO_CONNECTION
                | Self::BUSY
                | Self::TIMEOUT
                | Self::SERVICE_UNAVAILABLE
                | Self::TRY_ANOTHER_CM
                | Self::RATE_LIMIT_EXCEEDED
        )
    }

    pub fn name(&self) -> &'static str {
        match *self {
            Self::OK => "OK",
            Self::FAIL => "Fail",
            Self::NO_CONNECTION => "NoConnection",
            Self::INVALID_PASSWORD => "InvalidPassword",
            Self::LOGGED_IN_ELSEWHERE => "LoggedInElsewhere",
            Self::INVALID_PARAM => "InvalidParam",
            Self::BUSY => "Busy",
            Self::ACCESS_DENIED => "AccessDenied",
            Self::TIMEOUT => "Timeout",
            Self::SERVICE_UNAVAILABLE => "ServiceUnavailable",
            Self::LIMIT_EXCEEDED => "LimitExceeded",
            Self::TRY_ANOTHER_CM => "TryAnotherCM",
            Self::ACCOUNT_LOGON_DENIED => "AccountLogonDenied",
            Self::INVALID_LOGIN_AUTH_CODE => "InvalidLoginAuthCode",
            Self::RATE_LIMIT_EXCEEDED => "RateLimitExceeded",
            Self::ACCOUNT_LOGIN_DENIED_NEED_TWO_FACTOR => "AccountLoginDeniedNeedTwoFactor",
            Self::TWO_FACTOR_CODE_MISMATCH => "TwoFactorCodeMismatch",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for EResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Relationship between the bot account and another account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendRelationship {
    None,
    Blocked,
    RequestRecipient,
    Friend,
    RequestInitiator,
    Ignored,
    IgnoredFriend,
    Unknown(u32),
}

impl FriendRelationship {
    pub fn from_id(id: u32) -> Self {
        match id {
            0 => Self::None,
            1 => Self::Blocked,
            2 => Self::RequestRecipient,
            3 => Self::Friend,
            4 => Self::RequestInitiator,
            5 => Self::Ignored,
            6 => Self::IgnoredFriend,
            other => Self::Unknown(other),
        }
    }
}
