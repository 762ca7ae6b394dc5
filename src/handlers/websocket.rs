/// WebSocket session and broadcast endpoints
///
/// `GET /ws` upgrades to a WebSocket and runs one `WsSession` actor per
/// connection. The session registers itself in the `ConnectionRegistry` on
/// start, forwards broadcast frames out, hands every inbound text frame to
/// the `AlertRouter` as a background task, and unregisters on stop.
///
/// The channel is not authenticated here: identity fields inside events are
/// client-reported, and binding a connection to a verified member is left to
/// the platform's session layer.
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::websocket::{AlertRouter, BroadcastMessage, ConnectionId, ConnectionRegistry};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Serialized frame ready to be written to the socket
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct OutboundFrame(String);

/// Registry id assigned after the async registration completes
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Registered(ConnectionId);

struct WsSession {
    registry: ConnectionRegistry,
    router: Arc<AlertRouter>,
    connection_id: Option<ConnectionId>,
    hb: Instant,
}

impl WsSession {
    fn new(registry: ConnectionRegistry, router: Arc<AlertRouter>) -> Self {
        Self {
            registry,
            router,
            connection_id: None,
            hb: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("websocket heartbeat timed out, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        debug!("websocket session started");
        self.heartbeat(ctx);

        // Register with the shared registry and forward broadcast frames to
        // this actor. The forward task ends when the registry drops the
        // sender (unregister) or the actor is gone, in which case the next
        // broadcast send fails and the registry prunes the entry.
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let registry = self.registry.clone();
        let addr = ctx.address();
        actix::spawn(async move {
            let id = registry.register(tx).await;
            addr.do_send(Registered(id));
            while let Some(frame) = rx.recv().await {
                if addr.try_send(OutboundFrame(frame)).is_err() {
                    break;
                }
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        debug!("websocket session stopped");
        if let Some(id) = self.connection_id.take() {
            let registry = self.registry.clone();
            actix::spawn(async move {
                registry.unregister(id).await;
            });
        }
    }
}

impl Handler<Registered> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Registered, _ctx: &mut Self::Context) {
        self.connection_id = Some(msg.0);
    }
}

impl Handler<OutboundFrame> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: OutboundFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => {
                self.hb = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                // Dispatch off the actor so a slow push relay never stalls
                // this connection's receive loop.
                let router = self.router.clone();
                let raw = text.to_string();
                actix::spawn(async move {
                    router.dispatch(&raw).await;
                });
            }
            Ok(ws::Message::Binary(_)) => {
                debug!("ignoring binary websocket frame");
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "websocket protocol error, closing");
                ctx.stop();
            }
        }
    }
}

/// Upgrade to a WebSocket alert channel
///
/// Endpoint: GET /ws
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    registry: web::Data<ConnectionRegistry>,
    router: web::Data<Arc<AlertRouter>>,
) -> Result<HttpResponse, Error> {
    ws::start(
        WsSession::new(registry.get_ref().clone(), router.get_ref().clone()),
        &req,
        stream,
    )
}

/// Broadcast a frame to all open connections.
///
/// Collaborator entry point: bulletins, payment status changes, payment
/// reports and check-ins share the alert dispatcher through this endpoint.
///
/// Endpoint: POST /api/v1/ws/broadcast
pub async fn broadcast_message(
    registry: web::Data<ConnectionRegistry>,
    body: web::Json<BroadcastMessage>,
) -> ActixResult<HttpResponse> {
    let delivered = registry.broadcast(&body).await;
    info!(delivered, "broadcast via API");
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "delivered": delivered
    })))
}

/// Live connection stats
///
/// Endpoint: GET /api/v1/ws/stats
pub async fn ws_stats(registry: web::Data<ConnectionRegistry>) -> ActixResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "active_connections": registry.connection_count().await
    })))
}

/// Register WebSocket routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(ws_connect)).service(
        web::scope("/api/v1/ws")
            .route("/broadcast", web::post().to(broadcast_message))
            .route("/stats", web::get().to(ws_stats)),
    );
}
