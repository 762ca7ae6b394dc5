pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;
pub mod websocket;

pub use config::Config;
pub use error::{AppError, Result};
pub use services::{Audience, DeviceStore, PgDeviceStore, PushRelay, PushService, WebPushRelay};
pub use websocket::{AlertRouter, BroadcastMessage, ClientEvent, ConnectionRegistry};
