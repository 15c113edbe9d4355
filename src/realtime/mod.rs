//! Realtime invalidation: a hub connection pushing change events, and the
//! bridge turning them into tag invalidations for the store.

mod bridge;
mod connection;
mod hub;
pub mod protocol;

pub use bridge::{tags_for_event, Invalidation, RealtimeBridge, EVENT_TABLE};
pub use connection::{ConnectionState, EventHandler, HubConnection};
pub use hub::WsHubConnection;
