/// Wire types for the real-time alert channel
use crate::models::GeoPoint;
use serde::{Deserialize, Serialize};

/// Inbound event sent by a connected client, tagged by `type`.
///
/// Identity fields (`user`, `user_id`) are client-reported: the channel is
/// not authenticated at this layer, the platform's session layer sits in
/// front of it. Unrecognized type tags map to `Unknown` so the no-op branch
/// is explicit and forward-compatible.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Panic button pressed; highest urgency
    #[serde(rename = "panic_button")]
    PanicButton {
        user: String,
        #[serde(default)]
        user_id: Option<i64>,
        #[serde(default)]
        location: Option<String>,
        #[serde(default)]
        coords: Option<GeoPoint>,
    },

    /// Member announces they are on their way home
    #[serde(rename = "pre_arrival")]
    PreArrival {
        user: String,
        user_id: i64,
        unit: String,
    },

    /// Live position update for open map views
    #[serde(rename = "gps_update")]
    GpsUpdate { coords: GeoPoint },

    #[serde(other)]
    Unknown,
}

/// Outbound frame broadcast to every open connection, tagged by `type`.
///
/// The alert variants are produced by the router; bulletin, payment and
/// check-in variants are produced by collaborating services through the
/// broadcast endpoint and share the same dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum BroadcastMessage {
    #[serde(rename = "ALERTA_CRITICA")]
    CriticalAlert {
        user: String,
        msg: String,
        // serialized as null when absent, clients rely on the key being present
        coords: Option<GeoPoint>,
    },

    #[serde(rename = "PRE_ARRIVAL")]
    PreArrival {
        user: String,
        user_id: i64,
        unit: String,
        msg: String,
    },

    #[serde(rename = "GPS_UPDATE")]
    GpsUpdate { coords: GeoPoint },

    #[serde(rename = "NEW_BULLETIN")]
    NewBulletin { title: String },

    #[serde(rename = "PAYMENT_STATUS")]
    PaymentStatus { payment_id: i64, status: String },

    #[serde(rename = "NEW_PAYMENT_REPORT")]
    NewPaymentReport { user: String },

    #[serde(rename = "CHECK_IN")]
    CheckIn { user: String, unit: String },
}

impl BroadcastMessage {
    /// Serialize to a JSON frame
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
