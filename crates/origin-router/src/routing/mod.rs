//! Routing core: the shared route table and peer address aliasing.

pub mod aliases;
pub mod table;

pub use aliases::{candidate_keys, AddressError};
pub use table::{RouteAction, RouteEntry, RouteTable};
