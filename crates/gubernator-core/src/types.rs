//! Rate-limit request/response model shared by the RPC surface and the
//! HTTP/JSON gateway.
//!
//! Field names are snake_case on the wire; enums encode as their protocol
//! string names. Unknown fields are rejected to keep the contract strict.

use serde::{Deserialize, Serialize};

use crate::error::{GubernatorError, Result};
use crate::gregorian::GregorianUnit;

/// Behavior flags carried in [`RateLimitReq::behavior`] (bitset).
pub mod behavior {
    /// Coalesce forwarded sub-requests inside the batching window.
    pub const BATCHING: u32 = 0x01;
    /// Bypass the batching window for this request.
    pub const NO_BATCHING: u32 = 0x02;
    /// Eventually-consistent mode: serve locally, forward hits async.
    pub const GLOBAL: u32 = 0x04;
    /// `duration` selects a calendar unit instead of a rolling window.
    pub const DURATION_IS_GREGORIAN: u32 = 0x08;
    /// Refill the bucket to its limit without counting the current hits.
    pub const RESET_REMAINING: u32 = 0x10;
    /// Accepted for wire compatibility; single-region builds ignore it.
    pub const MULTI_REGION: u32 = 0x20;
    /// On over-limit, drain remaining to zero instead of leaving it intact.
    pub const DRAIN_OVER_LIMIT: u32 = 0x40;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Algorithm {
    #[default]
    #[serde(rename = "TOKEN_BUCKET")]
    TokenBucket,
    #[serde(rename = "LEAKY_BUCKET")]
    LeakyBucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Status {
    #[default]
    #[serde(rename = "UNDER_LIMIT")]
    UnderLimit,
    #[serde(rename = "OVER_LIMIT")]
    OverLimit,
}

/// One rate-limit check. `hits` may be negative (a refund).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitReq {
    /// Namespace the key lives in.
    pub name: String,
    /// Key within the namespace; the pair identifies one counter.
    pub unique_key: String,
    #[serde(default)]
    pub hits: i64,
    pub limit: i64,
    /// Window length in milliseconds, or a Gregorian sentinel.
    pub duration: i64,
    #[serde(default)]
    pub algorithm: Algorithm,
    /// Bitset over the [`behavior`] constants.
    #[serde(default)]
    pub behavior: u32,
    /// Burst capacity; zero means "use `limit`".
    #[serde(default)]
    pub burst: i64,
}

impl RateLimitReq {
    /// Cache and routing key for this counter.
    pub fn hash_key(&self) -> String {
        format!("{}_{}", self.name, self.unique_key)
    }

    pub fn has_behavior(&self, flag: u32) -> bool {
        self.behavior & flag != 0
    }

    /// Request-level validation. Failures are surfaced in-band in the
    /// response `error` field, not as top-level RPC errors.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(GubernatorError::Validation(
                "field 'namespace' cannot be empty".into(),
            ));
        }
        if self.unique_key.is_empty() {
            return Err(GubernatorError::Validation(
                "field 'unique_key' cannot be empty".into(),
            ));
        }
        if self.has_behavior(behavior::DURATION_IS_GREGORIAN)
            && GregorianUnit::from_duration(self.duration).is_none()
        {
            return Err(GubernatorError::Validation(
                "behavior DURATION_IS_GREGORIAN is set with an invalid duration".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RateLimitResp {
    pub status: Status,
    pub limit: i64,
    pub remaining: i64,
    /// Unix milliseconds at which the counter window resets.
    pub reset_time: i64,
    /// Empty on success; validation/transport text otherwise.
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetRateLimitsReq {
    pub requests: Vec<RateLimitReq>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetRateLimitsResp {
    /// Responses in the same order as the request batch.
    pub responses: Vec<RateLimitResp>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheckResp {
    /// "healthy" or "unhealthy".
    pub status: String,
    /// Aggregated peer-client errors when unhealthy.
    #[serde(default)]
    pub message: String,
    pub peer_count: i64,
}

/// Authoritative counter snapshot broadcast by an owner to all peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePeerGlobal {
    pub name: String,
    pub unique_key: String,
    pub algorithm: Algorithm,
    pub limit: i64,
    pub duration: i64,
    pub burst: i64,
    pub remaining: i64,
    pub reset_time: i64,
    /// Leaky-bucket leak origin; unused by token buckets.
    pub updated_at: i64,
}

impl UpdatePeerGlobal {
    pub fn hash_key(&self) -> String {
        format!("{}_{}", self.name, self.unique_key)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePeerGlobalsReq {
    pub globals: Vec<UpdatePeerGlobal>,
}

/// One peer's advertised addresses. Consistent hashing keys off
/// `grpc_address`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerInfo {
    pub grpc_address: String,
    pub http_address: String,
    #[serde(default)]
    pub data_center: String,
}
