//! Resource families and the endpoint table that describes them.

pub mod endpoints;
mod resources;

pub use endpoints::{Endpoint, EndpointKind, EndpointTable, EndpointTableError, TagSpec};
pub use resources::ResourceName;
