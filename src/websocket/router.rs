/// Alert Router
///
/// Protocol layer over one connection: parses a raw inbound frame into a
/// typed client event and dispatches it. For events that reach both
/// channels, the in-process broadcast to open connections always completes
/// before any push delivery is attempted, and push failures never affect
/// the already-completed broadcast or the hosting connection.
use crate::services::{Audience, PushService};
use crate::websocket::{BroadcastMessage, ClientEvent, ConnectionRegistry};
use std::sync::Arc;
use tracing::{info, trace, warn};

use crate::models::GeoPoint;

/// Fixed broadcast text for a critical alert
pub const PANIC_BROADCAST_MSG: &str = "¡ALERTA DE SEGURIDAD!";

pub struct AlertRouter {
    registry: ConnectionRegistry,
    push: Arc<PushService>,
}

impl AlertRouter {
    pub fn new(registry: ConnectionRegistry, push: Arc<PushService>) -> Self {
        Self { registry, push }
    }

    /// Handle one inbound frame.
    ///
    /// Malformed JSON, a missing type tag or an unrecognized tag are all
    /// silent no-ops: the connection stays open and keeps receiving.
    pub async fn dispatch(&self, raw: &str) {
        let event = match serde_json::from_str::<ClientEvent>(raw) {
            Ok(event) => event,
            Err(e) => {
                trace!(error = %e, "ignoring malformed client event");
                return;
            }
        };

        match event {
            ClientEvent::PanicButton {
                user,
                location,
                coords,
                ..
            } => self.handle_panic(user, location, coords).await,
            ClientEvent::PreArrival {
                user,
                user_id,
                unit,
            } => self.handle_pre_arrival(user, user_id, unit).await,
            ClientEvent::GpsUpdate { coords } => {
                // live map views only, no push
                self.registry
                    .broadcast(&BroadcastMessage::GpsUpdate { coords })
                    .await;
            }
            ClientEvent::Unknown => {
                trace!("ignoring unrecognized client event type");
            }
        }
    }

    async fn handle_panic(
        &self,
        user: String,
        location: Option<String>,
        coords: Option<GeoPoint>,
    ) {
        // Open clients must see the alert with minimal latency: broadcast
        // completes before any push call is attempted.
        let delivered = self
            .registry
            .broadcast(&BroadcastMessage::CriticalAlert {
                user: user.clone(),
                msg: PANIC_BROADCAST_MSG.to_string(),
                coords,
            })
            .await;
        info!(user = %user, delivered, "critical alert broadcast");

        let body = match &location {
            Some(location) => format!("{user} activó el botón de pánico ({location})"),
            None => format!("{user} activó el botón de pánico"),
        };
        match self
            .push
            .deliver_to_all_active("🚨 Alerta de pánico", &body)
            .await
        {
            Ok(report) => info!(
                delivered = report.delivered,
                deactivated = report.deactivated,
                failed = report.failed,
                "panic push delivery complete"
            ),
            Err(e) => warn!(error = %e, "panic push delivery skipped"),
        }
    }

    async fn handle_pre_arrival(&self, user: String, user_id: i64, unit: String) {
        let msg = format!("{user} está en camino a {unit}");
        self.registry
            .broadcast(&BroadcastMessage::PreArrival {
                user: user.clone(),
                user_id,
                unit: unit.clone(),
                msg,
            })
            .await;

        // Household co-members plus security staff, never the reporter
        let audience = Audience::household_and_security(unit.clone(), user_id);
        let body = format!("{user} está en camino a la unidad {unit}");
        match self
            .push
            .deliver_to_targets(&audience, "Aviso de llegada", &body)
            .await
        {
            Ok(report) => info!(
                delivered = report.delivered,
                deactivated = report.deactivated,
                failed = report.failed,
                "pre-arrival push delivery complete"
            ),
            Err(e) => warn!(error = %e, "pre-arrival push delivery skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemberRole;
    use crate::services::testutil::{device, member, InMemoryDeviceStore, MockRelay};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Harness {
        router: AlertRouter,
        registry: ConnectionRegistry,
        relay: Arc<MockRelay>,
    }

    fn harness(store: InMemoryDeviceStore) -> Harness {
        let registry = ConnectionRegistry::new();
        let relay = Arc::new(MockRelay::default());
        let push = Arc::new(PushService::new(Arc::new(store), Some(relay.clone())));
        Harness {
            router: AlertRouter::new(registry.clone(), push),
            registry,
            relay,
        }
    }

    fn single_member_store() -> InMemoryDeviceStore {
        InMemoryDeviceStore::new(
            vec![member(1, Some("A-101"), MemberRole::User)],
            vec![device(1, "https://push/a", true)],
        )
    }

    #[tokio::test]
    async fn test_panic_broadcasts_exact_frame_then_pushes_everyone() {
        let h = harness(single_member_store());
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.registry.register(tx).await;

        h.router
            .dispatch(r#"{"type":"panic_button","user":"Ana","coords":{"lat":-12.1,"lon":-77.0}}"#)
            .await;

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            frame,
            json!({
                "type": "ALERTA_CRITICA",
                "user": "Ana",
                "msg": "¡ALERTA DE SEGURIDAD!",
                "coords": {"lat": -12.1, "lon": -77.0}
            })
        );

        assert_eq!(h.relay.calls(), vec!["https://push/a".to_string()]);
        let payloads = h.relay.payloads();
        assert_eq!(payloads[0].title, "🚨 Alerta de pánico");
        assert!(payloads[0].body.contains("Ana"));
    }

    #[tokio::test]
    async fn test_panic_embeds_location_in_push_body() {
        let h = harness(single_member_store());

        h.router
            .dispatch(r#"{"type":"panic_button","user":"Ana","location":"estacionamiento"}"#)
            .await;

        let payloads = h.relay.payloads();
        assert!(payloads[0].body.contains("estacionamiento"));
    }

    #[tokio::test]
    async fn test_panic_broadcast_survives_unconfigured_push() {
        let registry = ConnectionRegistry::new();
        let push = Arc::new(PushService::new(
            Arc::new(single_member_store()),
            None,
        ));
        let router = AlertRouter::new(registry.clone(), push);

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(tx).await;

        router
            .dispatch(r#"{"type":"panic_button","user":"Ana"}"#)
            .await;

        // broadcast still delivered, coords key present as null
        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "ALERTA_CRITICA");
        assert!(frame["coords"].is_null());
    }

    #[tokio::test]
    async fn test_pre_arrival_targets_household_and_security_only() {
        let store = InMemoryDeviceStore::new(
            vec![
                member(1, Some("A-101"), MemberRole::User),
                member(2, Some("A-101"), MemberRole::User),
                member(3, Some("B-202"), MemberRole::User),
                member(4, Some("B-202"), MemberRole::Security),
            ],
            vec![
                device(1, "https://push/reporter", true),
                device(2, "https://push/neighbor", true),
                device(3, "https://push/other", true),
                device(4, "https://push/guard", true),
            ],
        );
        let h = harness(store);
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.registry.register(tx).await;

        h.router
            .dispatch(r#"{"type":"pre_arrival","user":"Luis","user_id":1,"unit":"A-101"}"#)
            .await;

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "PRE_ARRIVAL");
        assert_eq!(frame["user_id"], 1);
        assert_eq!(frame["unit"], "A-101");

        let mut calls = h.relay.calls();
        calls.sort();
        assert_eq!(
            calls,
            vec!["https://push/guard".to_string(), "https://push/neighbor".to_string()]
        );
    }

    #[tokio::test]
    async fn test_gps_update_broadcasts_without_push() {
        let h = harness(single_member_store());
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.registry.register(tx).await;

        h.router
            .dispatch(r#"{"type":"gps_update","coords":{"lat":1.0,"lon":2.0}}"#)
            .await;

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "GPS_UPDATE");
        assert!(h.relay.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_events_are_no_ops() {
        let h = harness(single_member_store());
        let (tx, mut rx) = mpsc::unbounded_channel();
        h.registry.register(tx).await;

        h.router.dispatch(r#"{"type":"karaoke_night"}"#).await;
        h.router.dispatch(r#"{"user":"Ana"}"#).await;
        h.router.dispatch("not json at all").await;

        assert!(rx.try_recv().is_err());
        assert!(h.relay.calls().is_empty());
        // the connection is still live
        assert_eq!(h.registry.connection_count().await, 1);
    }
}
