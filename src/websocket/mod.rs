/// Real-time alert fan-out
///
/// Architecture:
/// 1. ConnectionRegistry: tracks live WebSocket connections and broadcasts
///    to a snapshot of them, pruning dead senders
/// 2. Typed messages: inbound client events and outbound broadcast frames
/// 3. AlertRouter: dispatches a client event to broadcast first, push second

pub mod messages;
pub mod registry;
pub mod router;

pub use messages::{BroadcastMessage, ClientEvent};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use router::AlertRouter;
