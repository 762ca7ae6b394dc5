/// Push subscription management handlers
use super::ApiResponse;
use crate::config::Config;
use crate::services::{DeviceStore, PushSubscription};
use actix_web::{web, HttpResponse, Result as ActixResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Browser `PushSubscription` JSON as sent by the service worker
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubscribePayload {
    pub member_id: i64,
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UnsubscribePayload {
    pub endpoint: String,
}

/// Register or refresh a push subscription.
///
/// Upserts by endpoint: re-subscribing a previously deactivated device
/// reactivates it.
///
/// POST /api/v1/devices/subscribe
pub async fn subscribe_device(
    store: web::Data<Arc<dyn DeviceStore>>,
    req: web::Json<SubscribePayload>,
) -> ActixResult<HttpResponse> {
    let subscription = PushSubscription {
        endpoint: req.endpoint.clone(),
        p256dh: req.keys.p256dh.clone(),
        auth: req.keys.auth.clone(),
    };

    match store.upsert_subscription(req.member_id, &subscription).await {
        Ok(device_id) => {
            info!(member_id = req.member_id, %device_id, "push subscription registered");
            Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
                "device_id": device_id
            }))))
        }
        Err(e) => Ok(HttpResponse::InternalServerError().json(ApiResponse::<String>::err(e))),
    }
}

/// Deactivate a subscription by endpoint
///
/// POST /api/v1/devices/unsubscribe
pub async fn unsubscribe_device(
    store: web::Data<Arc<dyn DeviceStore>>,
    req: web::Json<UnsubscribePayload>,
) -> ActixResult<HttpResponse> {
    match store.deactivate_by_endpoint(&req.endpoint).await {
        Ok(removed) => Ok(HttpResponse::Ok().json(ApiResponse::ok(serde_json::json!({
            "removed": removed
        })))),
        Err(e) => Ok(HttpResponse::InternalServerError().json(ApiResponse::<String>::err(e))),
    }
}

/// List a member's devices
///
/// GET /api/v1/devices/member/{member_id}
pub async fn get_member_devices(
    store: web::Data<Arc<dyn DeviceStore>>,
    path: web::Path<i64>,
) -> ActixResult<HttpResponse> {
    let member_id = path.into_inner();

    match store.member_devices(member_id).await {
        Ok(devices) => Ok(HttpResponse::Ok().json(ApiResponse::ok(devices))),
        Err(e) => Ok(HttpResponse::InternalServerError().json(ApiResponse::<String>::err(e))),
    }
}

/// VAPID application server key for the browser's `applicationServerKey`
///
/// GET /api/v1/push/public-key
pub async fn vapid_public_key(config: web::Data<Config>) -> ActixResult<HttpResponse> {
    match &config.push.vapid_public_key {
        Some(key) => Ok(HttpResponse::Ok().json(serde_json::json!({ "public_key": key }))),
        None => Ok(HttpResponse::NotFound()
            .json(ApiResponse::<String>::err("VAPID public key not configured"))),
    }
}

/// Register routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/devices")
            .route("/subscribe", web::post().to(subscribe_device))
            .route("/unsubscribe", web::post().to(unsubscribe_device))
            .route("/member/{member_id}", web::get().to(get_member_devices)),
    )
    .service(web::scope("/api/v1/push").route("/public-key", web::get().to(vapid_public_key)));
}
