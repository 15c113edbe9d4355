//! The nine resource families the client caches.

use std::fmt;
use std::str::FromStr;

use crate::cache::TagKind;
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceName {
  Animals,
  Events,
  Habitats,
  News,
  Tickets,
  Products,
  Locations,
  Orders,
  Auth,
}

impl ResourceName {
  pub const ALL: [ResourceName; 9] = [
    ResourceName::Animals,
    ResourceName::Events,
    ResourceName::Habitats,
    ResourceName::News,
    ResourceName::Tickets,
    ResourceName::Products,
    ResourceName::Locations,
    ResourceName::Orders,
    ResourceName::Auth,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceName::Animals => "animals",
      ResourceName::Events => "events",
      ResourceName::Habitats => "habitats",
      ResourceName::News => "news",
      ResourceName::Tickets => "tickets",
      ResourceName::Products => "products",
      ResourceName::Locations => "locations",
      ResourceName::Orders => "orders",
      ResourceName::Auth => "auth",
    }
  }

  /// The resource cache that holds entries tagged with `kind`.
  ///
  /// Order items live in the orders cache.
  pub fn owning(kind: TagKind) -> Self {
    match kind {
      TagKind::Animals => ResourceName::Animals,
      TagKind::Events => ResourceName::Events,
      TagKind::Habitats => ResourceName::Habitats,
      TagKind::News => ResourceName::News,
      TagKind::Tickets => ResourceName::Tickets,
      TagKind::Products => ResourceName::Products,
      TagKind::Locations => ResourceName::Locations,
      TagKind::Orders | TagKind::OrderItems => ResourceName::Orders,
      TagKind::Auth => ResourceName::Auth,
    }
  }
}

impl fmt::Display for ResourceName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResourceName {
  type Err = ValidationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let lower = s.trim().to_lowercase();
    ResourceName::ALL
      .iter()
      .copied()
      .find(|r| r.as_str() == lower)
      .ok_or_else(|| ValidationError::UnknownEndpoint {
        resource: s.to_string(),
        endpoint: String::new(),
      })
  }
}
