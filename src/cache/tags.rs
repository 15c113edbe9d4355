//! Invalidation tags.
//!
//! A tag is a dependency label: a resource type plus either `LIST` or a
//! specific identifier. It carries no data.

use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Resource types a tag can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagKind {
  Animals,
  Events,
  Habitats,
  News,
  Tickets,
  Products,
  Locations,
  Orders,
  OrderItems,
  Auth,
}

impl TagKind {
  pub const ALL: [TagKind; 10] = [
    TagKind::Animals,
    TagKind::Events,
    TagKind::Habitats,
    TagKind::News,
    TagKind::Tickets,
    TagKind::Products,
    TagKind::Locations,
    TagKind::Orders,
    TagKind::OrderItems,
    TagKind::Auth,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      TagKind::Animals => "Animals",
      TagKind::Events => "Events",
      TagKind::Habitats => "Habitats",
      TagKind::News => "News",
      TagKind::Tickets => "Tickets",
      TagKind::Products => "Products",
      TagKind::Locations => "Locations",
      TagKind::Orders => "Orders",
      TagKind::OrderItems => "OrderItems",
      TagKind::Auth => "Auth",
    }
  }

  fn parse(s: &str) -> Option<Self> {
    TagKind::ALL.iter().copied().find(|k| k.as_str() == s)
  }
}

/// `LIST` or a specific identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagId {
  List,
  Id(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
  pub kind: TagKind,
  pub id: TagId,
}

impl Tag {
  pub fn list(kind: TagKind) -> Self {
    Self {
      kind,
      id: TagId::List,
    }
  }

  pub fn item(kind: TagKind, id: impl Into<String>) -> Self {
    Self {
      kind,
      id: TagId::Id(id.into()),
    }
  }

  pub fn is_list(&self) -> bool {
    matches!(self.id, TagId::List)
  }
}

impl fmt::Display for Tag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.id {
      TagId::List => write!(f, "{}:LIST", self.kind.as_str()),
      TagId::Id(id) => write!(f, "{}:{}", self.kind.as_str(), id),
    }
  }
}

impl FromStr for Tag {
  type Err = ValidationError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (kind, id) = s
      .split_once(':')
      .ok_or_else(|| ValidationError::InvalidTag(s.to_string()))?;
    let kind = TagKind::parse(kind).ok_or_else(|| ValidationError::InvalidTag(s.to_string()))?;
    match id {
      "" => Err(ValidationError::InvalidTag(s.to_string())),
      "LIST" => Ok(Tag::list(kind)),
      other => Ok(Tag::item(kind, other)),
    }
  }
}
