pub mod device_store;
pub mod push;

pub use device_store::{Audience, DeviceStore, PgDeviceStore};
pub use push::{
    DeliveryReport, PushPayload, PushRelay, PushService, PushSubscription, RelayError,
    WebPushRelay,
};
