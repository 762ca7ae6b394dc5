use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Member role within an organization
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// Organization administrator
    Admin,
    /// Front-desk / management staff
    Staff,
    /// Security personnel
    Security,
    /// Regular resident / member
    User,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Admin => "admin",
            MemberRole::Staff => "staff",
            MemberRole::Security => "security",
            MemberRole::User => "user",
        }
    }
}

/// A member of one organization (condominium, club, association).
///
/// Read-only in this service; used as a filter key when resolving
/// push audiences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,

    /// Owning organization (tenant)
    pub organization_id: i64,

    pub display_name: String,

    pub role: MemberRole,

    /// Unit/location label, e.g. apartment number
    pub unit: Option<String>,

    pub is_active: bool,
}

/// A web-push subscription record tied to one member's browser/app instance.
///
/// The endpoint is unique across all devices. Devices are deactivated (never
/// deleted) when the push relay reports the subscription gone, and
/// reactivated on re-subscription.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: Uuid,

    pub member_id: i64,

    /// Push service endpoint URL
    pub endpoint: String,

    /// Browser's P-256 ECDH public key (base64url)
    pub p256dh_key: String,

    /// Shared auth secret (base64url)
    pub auth_key: String,

    pub is_active: bool,

    pub last_seen_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
}

/// Geographic coordinates carried by panic and GPS events
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}
