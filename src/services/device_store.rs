/// Device subscription persistence and push audience resolution
use crate::error::Result;
use crate::models::{Device, Member, MemberRole};
use crate::services::push::PushSubscription;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Filter over members used to select which devices receive a push.
///
/// A member matches when they live in `unit` (excluding `exclude_member`)
/// or when their role is one of `roles`. Either side may be empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Audience {
    pub unit: Option<String>,
    pub exclude_member: Option<i64>,
    pub roles: Vec<MemberRole>,
}

impl Audience {
    /// Audience for a pre-arrival notice: the reporter's household
    /// co-members plus all staff, security and admin members.
    pub fn household_and_security(unit: String, reporter_id: i64) -> Self {
        Self {
            unit: Some(unit),
            exclude_member: Some(reporter_id),
            roles: vec![MemberRole::Staff, MemberRole::Security, MemberRole::Admin],
        }
    }

    pub fn matches(&self, member: &Member) -> bool {
        // The excluded member (the reporter) never receives their own notice,
        // whatever their role.
        if self.exclude_member == Some(member.id) {
            return false;
        }
        let in_unit = match (&self.unit, &member.unit) {
            (Some(unit), Some(member_unit)) => unit == member_unit,
            _ => false,
        };
        in_unit || self.roles.contains(&member.role)
    }

    fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|r| r.as_str().to_string()).collect()
    }
}

/// Read side for audience resolution plus the single write this service
/// performs: flipping `is_active` on terminal push failure or
/// (un)subscription.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Every device with `is_active = true`
    async fn active_devices(&self) -> Result<Vec<Device>>;

    /// Active devices of members matching the audience
    async fn active_devices_for(&self, audience: &Audience) -> Result<Vec<Device>>;

    /// Mark one device inactive. Persisted immediately, not batched, so a
    /// dead endpoint is never retried on the next delivery cycle.
    async fn deactivate(&self, device_id: Uuid) -> Result<()>;

    /// Insert or refresh a subscription keyed by endpoint, reactivating it.
    /// Returns the device id.
    async fn upsert_subscription(
        &self,
        member_id: i64,
        subscription: &PushSubscription,
    ) -> Result<Uuid>;

    /// Deactivate by endpoint (explicit unsubscribe). Returns whether a
    /// device existed for the endpoint.
    async fn deactivate_by_endpoint(&self, endpoint: &str) -> Result<bool>;

    /// All devices of one member, active or not
    async fn member_devices(&self, member_id: i64) -> Result<Vec<Device>>;
}

const DEVICE_COLUMNS: &str =
    "d.id, d.member_id, d.endpoint, d.p256dh_key, d.auth_key, d.is_active, d.last_seen_at, d.created_at";

/// Postgres-backed device store
pub struct PgDeviceStore {
    db: PgPool,
}

impl PgDeviceStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DeviceStore for PgDeviceStore {
    async fn active_devices(&self) -> Result<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices d WHERE d.is_active = TRUE"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(devices)
    }

    async fn active_devices_for(&self, audience: &Audience) -> Result<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS}
             FROM devices d
             JOIN members m ON m.id = d.member_id
             WHERE d.is_active = TRUE
               AND m.is_active = TRUE
               AND ($2::BIGINT IS NULL OR m.id <> $2)
               AND (m.unit = $1 OR m.role = ANY($3))"
        ))
        .bind(&audience.unit)
        .bind(audience.exclude_member)
        .bind(audience.role_names())
        .fetch_all(&self.db)
        .await?;
        Ok(devices)
    }

    async fn deactivate(&self, device_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE devices SET is_active = FALSE WHERE id = $1")
            .bind(device_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn upsert_subscription(
        &self,
        member_id: i64,
        subscription: &PushSubscription,
    ) -> Result<Uuid> {
        let (id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO devices (member_id, endpoint, p256dh_key, auth_key, is_active, last_seen_at)
             VALUES ($1, $2, $3, $4, TRUE, NOW())
             ON CONFLICT (endpoint) DO UPDATE
             SET member_id = EXCLUDED.member_id,
                 p256dh_key = EXCLUDED.p256dh_key,
                 auth_key = EXCLUDED.auth_key,
                 is_active = TRUE,
                 last_seen_at = NOW()
             RETURNING id",
        )
        .bind(member_id)
        .bind(&subscription.endpoint)
        .bind(&subscription.p256dh)
        .bind(&subscription.auth)
        .fetch_one(&self.db)
        .await?;
        Ok(id)
    }

    async fn deactivate_by_endpoint(&self, endpoint: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE devices SET is_active = FALSE WHERE endpoint = $1")
            .bind(endpoint)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn member_devices(&self, member_id: i64) -> Result<Vec<Device>> {
        let devices = sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices d WHERE d.member_id = $1 ORDER BY d.created_at"
        ))
        .bind(member_id)
        .fetch_all(&self.db)
        .await?;
        Ok(devices)
    }
}
