/// Web-push delivery worker
///
/// Sends encrypted web push messages (RFC 8030/8291) with VAPID
/// authentication (RFC 8292) to every device in a resolved audience, one
/// relay call per device. Per-device failures never abort the loop: a 410
/// from the relay deactivates the device immediately, anything else is
/// logged and the device stays active.
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::Device;
use crate::services::device_store::{Audience, DeviceStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// A browser push subscription: endpoint plus the key pair used to encrypt
/// payloads for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushSubscription {
    pub endpoint: String,
    /// Browser's P-256 ECDH public key (base64url)
    pub p256dh: String,
    /// Shared auth secret (base64url)
    pub auth: String,
}

impl From<&Device> for PushSubscription {
    fn from(device: &Device) -> Self {
        Self {
            endpoint: device.endpoint.clone(),
            p256dh: device.p256dh_key.clone(),
            auth: device.auth_key.clone(),
        }
    }
}

/// JSON payload delivered inside the encrypted push message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl PushPayload {
    pub fn new(title: &str, body: &str) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            url: "/".to_string(),
            icon: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    /// Terminal: the push service reported the subscription gone (410)
    #[error("subscription gone")]
    SubscriptionGone,

    /// Anything else: network error, 5xx, rate limit. Assumed transient.
    #[error("push relay error: {0}")]
    Transient(String),
}

/// Seam over the external push relay so delivery logic is testable without
/// a live push service.
#[async_trait]
pub trait PushRelay: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> std::result::Result<(), RelayError>;
}

/// Production relay: VAPID-signed, aes128gcm-encrypted web push sent over
/// a shared reqwest client.
///
/// The private key is the raw 32-byte P-256 scalar, base64url-encoded. No
/// per-call timeout beyond the reqwest default; bounding it is a known
/// hardening so one unreachable push service cannot stall the rest of a
/// delivery cycle.
pub struct WebPushRelay {
    client: reqwest::Client,
    vapid_private_key: String,
    subject: String,
}

impl WebPushRelay {
    pub fn new(vapid_private_key: String, subject: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            vapid_private_key,
            subject,
        }
    }
}

#[async_trait]
impl PushRelay for WebPushRelay {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> std::result::Result<(), RelayError> {
        use web_push::{
            ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushMessageBuilder,
        };

        let sub_info = SubscriptionInfo::new(
            &subscription.endpoint,
            &subscription.p256dh,
            &subscription.auth,
        );

        let mut sig_builder =
            VapidSignatureBuilder::from_base64(&self.vapid_private_key, &sub_info)
                .map_err(|e| RelayError::Transient(format!("vapid signature: {e}")))?;
        sig_builder.add_claim("sub", self.subject.clone());
        let signature = sig_builder
            .build()
            .map_err(|e| RelayError::Transient(format!("vapid signing: {e}")))?;

        let body = serde_json::to_vec(payload)
            .map_err(|e| RelayError::Transient(format!("payload serialization: {e}")))?;

        let mut builder = WebPushMessageBuilder::new(&sub_info);
        builder.set_payload(ContentEncoding::Aes128Gcm, &body);
        builder.set_vapid_signature(signature);
        builder.set_ttl(3600);
        let message = builder
            .build()
            .map_err(|e| RelayError::Transient(format!("message encryption: {e}")))?;

        let mut request = self
            .client
            .post(message.endpoint.to_string())
            .header("TTL", message.ttl.to_string());

        if let Some(push_payload) = message.payload {
            request = request
                .header("Content-Encoding", push_payload.content_encoding.to_str())
                .header("Content-Type", "application/octet-stream");
            for (key, value) in &push_payload.crypto_headers {
                request = request.header(*key, value.as_str());
            }
            request = request.body(push_payload.content);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RelayError::Transient(format!("http: {e}")))?;

        match response.status().as_u16() {
            200..=299 => Ok(()),
            410 => Err(RelayError::SubscriptionGone),
            status => Err(RelayError::Transient(format!(
                "push relay responded with HTTP {status}"
            ))),
        }
    }
}

/// Outcome counts for one delivery cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub deactivated: usize,
    pub failed: usize,
}

/// Push Delivery Worker
///
/// Resolves a target audience through the device store and runs the
/// per-device delivery loop. Constructed without a relay when no VAPID
/// signing key is configured; in that case every delivery call reports a
/// configuration error instead of contacting anything.
pub struct PushService {
    devices: Arc<dyn DeviceStore>,
    relay: Option<Arc<dyn PushRelay>>,
}

impl PushService {
    pub fn new(devices: Arc<dyn DeviceStore>, relay: Option<Arc<dyn PushRelay>>) -> Self {
        Self { devices, relay }
    }

    pub fn is_configured(&self) -> bool {
        self.relay.is_some()
    }

    /// Deliver to every active device
    pub async fn deliver_to_all_active(&self, title: &str, body: &str) -> Result<DeliveryReport> {
        let relay = self.relay()?;
        let devices = self.devices.active_devices().await?;
        Ok(self.deliver(relay, devices, title, body).await)
    }

    /// Deliver to the active devices of members matching the audience
    pub async fn deliver_to_targets(
        &self,
        audience: &Audience,
        title: &str,
        body: &str,
    ) -> Result<DeliveryReport> {
        let relay = self.relay()?;
        let devices = self.devices.active_devices_for(audience).await?;
        Ok(self.deliver(relay, devices, title, body).await)
    }

    fn relay(&self) -> Result<Arc<dyn PushRelay>> {
        self.relay.clone().ok_or_else(|| {
            AppError::Config("VAPID signing key not configured; push delivery skipped".to_string())
        })
    }

    async fn deliver(
        &self,
        relay: Arc<dyn PushRelay>,
        devices: Vec<Device>,
        title: &str,
        body: &str,
    ) -> DeliveryReport {
        let payload = PushPayload::new(title, body);
        let mut report = DeliveryReport::default();

        for device in devices {
            report.attempted += 1;
            let subscription = PushSubscription::from(&device);
            match relay.send(&subscription, &payload).await {
                Ok(()) => {
                    report.delivered += 1;
                    metrics::record_push("delivered");
                }
                Err(RelayError::SubscriptionGone) => {
                    warn!(device_id = %device.id, "push subscription gone, deactivating device");
                    if let Err(e) = self.devices.deactivate(device.id).await {
                        warn!(device_id = %device.id, error = %e, "failed to deactivate device");
                    }
                    report.deactivated += 1;
                    metrics::record_push("gone");
                }
                Err(e) => {
                    warn!(device_id = %device.id, error = %e, "push delivery failed");
                    report.failed += 1;
                    metrics::record_push("failed");
                }
            }
        }

        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            deactivated = report.deactivated,
            failed = report.failed,
            "push delivery cycle complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemberRole;
    use crate::services::testutil::{device, member, InMemoryDeviceStore, MockRelay};

    fn service(store: Arc<InMemoryDeviceStore>, relay: Arc<MockRelay>) -> PushService {
        PushService::new(store, Some(relay))
    }

    #[tokio::test]
    async fn test_delivers_only_to_active_devices() {
        let store = Arc::new(InMemoryDeviceStore::new(
            vec![member(1, Some("A-101"), MemberRole::User)],
            vec![device(1, "https://push/a", true), device(1, "https://push/b", false)],
        ));
        let relay = Arc::new(MockRelay::default());
        let push = service(store, relay.clone());

        let report = push.deliver_to_all_active("t", "b").await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(relay.calls(), vec!["https://push/a".to_string()]);
    }

    #[tokio::test]
    async fn test_gone_subscription_is_deactivated_and_not_retried() {
        let store = Arc::new(InMemoryDeviceStore::new(
            vec![member(1, Some("A-101"), MemberRole::User)],
            vec![device(1, "https://push/a", true), device(1, "https://push/b", true)],
        ));
        let relay = Arc::new(MockRelay::default());
        relay.fail_gone("https://push/b");
        let push = service(store.clone(), relay.clone());

        let report = push.deliver_to_all_active("t", "b").await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.deactivated, 1);
        assert!(!store.is_active("https://push/b"));

        // second cycle must not contact the dead endpoint
        relay.clear_calls();
        let report = push.deliver_to_all_active("t", "b").await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(relay.calls(), vec!["https://push/a".to_string()]);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_device_active() {
        let store = Arc::new(InMemoryDeviceStore::new(
            vec![member(1, Some("A-101"), MemberRole::User)],
            vec![device(1, "https://push/a", true)],
        ));
        let relay = Arc::new(MockRelay::default());
        relay.fail_transient("https://push/a");
        let push = service(store.clone(), relay.clone());

        let report = push.deliver_to_all_active("t", "b").await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.deactivated, 0);
        assert!(store.is_active("https://push/a"));
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_the_loop() {
        let store = Arc::new(InMemoryDeviceStore::new(
            vec![member(1, Some("A-101"), MemberRole::User)],
            vec![
                device(1, "https://push/a", true),
                device(1, "https://push/b", true),
                device(1, "https://push/c", true),
            ],
        ));
        let relay = Arc::new(MockRelay::default());
        relay.fail_transient("https://push/b");
        let push = service(store, relay.clone());

        let report = push.deliver_to_all_active("t", "b").await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(relay.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_signing_key_is_a_config_error() {
        let store = Arc::new(InMemoryDeviceStore::new(vec![], vec![]));
        let push = PushService::new(store, None);

        assert!(!push.is_configured());
        let err = push.deliver_to_all_active("t", "b").await.unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[tokio::test]
    async fn test_deliver_to_targets_resolves_audience() {
        let store = Arc::new(InMemoryDeviceStore::new(
            vec![
                member(1, Some("A-101"), MemberRole::User), // reporter
                member(2, Some("A-101"), MemberRole::User), // co-resident
                member(3, Some("B-202"), MemberRole::User), // other unit
                member(4, Some("B-202"), MemberRole::Security),
            ],
            vec![
                device(1, "https://push/reporter", true),
                device(2, "https://push/neighbor", true),
                device(3, "https://push/other", true),
                device(4, "https://push/guard", true),
            ],
        ));
        let relay = Arc::new(MockRelay::default());
        let push = service(store, relay.clone());

        let audience = Audience::household_and_security("A-101".to_string(), 1);
        let report = push.deliver_to_targets(&audience, "t", "b").await.unwrap();

        assert_eq!(report.attempted, 2);
        let mut calls = relay.calls();
        calls.sort();
        assert_eq!(
            calls,
            vec!["https://push/guard".to_string(), "https://push/neighbor".to_string()]
        );
    }
}
