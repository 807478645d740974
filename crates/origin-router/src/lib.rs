//! origin-router: routes HTTP traffic by the connecting peer's address.
//!
//! A single listener fronts many backends. The peer address is expanded into
//! candidate origin keys (`routing::aliases`), the first key present in the
//! shared route table (`routing::table`) wins, and the matched route either
//! redirects the client or proxies the request (`dispatch`). Routes are
//! managed over a separate admin API (`admin`) and persisted (`store`).

pub mod admin;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod routing;
pub mod server;
pub mod store;
