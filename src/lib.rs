//! Resource cache and realtime invalidation core for the zoo companion app.
//!
//! Nine resource caches (animals, events, habitats, news, tickets, products,
//! locations, orders, auth) answer queries from memory or through a
//! [`transport::Transport`], and stay consistent through tag invalidation:
//! mutations invalidate the tags they declare, and the
//! [`realtime::RealtimeBridge`] turns server push events into the same
//! invalidations. The [`store::GlobalStore`] ties the caches together with
//! the session and cart.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod consumer;
pub mod error;
pub mod persistence;
pub mod realtime;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;
