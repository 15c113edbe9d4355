//! Central endpoint table.
//!
//! Every endpoint of every resource family is declared here, with the tags
//! its queries provide and the tags its mutations invalidate. The table is
//! validated once at startup: an invalidation that no query provides would
//! silently never refresh anything, so it is rejected.

use std::collections::{BTreeMap, HashSet};

use serde_json::Value;
use thiserror::Error;

use super::resources::ResourceName;
use crate::cache::{Tag, TagKind};
use crate::error::ValidationError;
use crate::transport::Method;

/// Parameters that are part of the cache key and must be positive integers.
const PAGINATION_PARAMS: [&str; 2] = ["pageSize", "currentPage"];

/// How an endpoint names a tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagSpec {
  /// `<Kind>:LIST`
  List(TagKind),
  /// `<Kind>:<args[field]>`
  Param { kind: TagKind, field: &'static str },
  /// `<Kind>:<id>` for a fixed identifier
  Fixed { kind: TagKind, id: &'static str },
}

impl TagSpec {
  /// Resolve against request arguments. `None` when the field is absent.
  pub fn resolve(&self, args: &Value) -> Option<Tag> {
    match self {
      TagSpec::List(kind) => Some(Tag::list(*kind)),
      TagSpec::Fixed { kind, id } => Some(Tag::item(*kind, *id)),
      TagSpec::Param { kind, field } => scalar_param(args, field).map(|id| Tag::item(*kind, id)),
    }
  }

  fn kind(&self) -> TagKind {
    match self {
      TagSpec::List(kind) | TagSpec::Param { kind, .. } | TagSpec::Fixed { kind, .. } => *kind,
    }
  }

  /// Whether some tag produced by `self` could also be produced by `other`.
  fn overlaps(&self, other: &TagSpec) -> bool {
    if self.kind() != other.kind() {
      return false;
    }
    match (self, other) {
      (TagSpec::List(_), TagSpec::List(_)) => true,
      (TagSpec::List(_), _) | (_, TagSpec::List(_)) => false,
      (TagSpec::Fixed { id: a, .. }, TagSpec::Fixed { id: b, .. }) => a == b,
      _ => true,
    }
  }
}

impl std::fmt::Display for TagSpec {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      TagSpec::List(kind) => write!(f, "{}:LIST", kind.as_str()),
      TagSpec::Param { kind, field } => write!(f, "{}:{{{}}}", kind.as_str(), field),
      TagSpec::Fixed { kind, id } => write!(f, "{}:{}", kind.as_str(), id),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointKind {
  Query { provides: Vec<TagSpec> },
  Mutation { invalidates: Vec<TagSpec> },
}

#[derive(Debug, Clone)]
pub struct Endpoint {
  pub resource: ResourceName,
  pub name: &'static str,
  pub method: Method,
  /// Path template; `{field}` placeholders are filled from the arguments
  pub path: &'static str,
  pub kind: EndpointKind,
}

impl Endpoint {
  pub(crate) fn query(
    resource: ResourceName,
    name: &'static str,
    path: &'static str,
    provides: Vec<TagSpec>,
  ) -> Self {
    Self {
      resource,
      name,
      method: Method::Get,
      path,
      kind: EndpointKind::Query { provides },
    }
  }

  pub(crate) fn mutation(
    resource: ResourceName,
    name: &'static str,
    method: Method,
    path: &'static str,
    invalidates: Vec<TagSpec>,
  ) -> Self {
    Self {
      resource,
      name,
      method,
      path,
      kind: EndpointKind::Mutation { invalidates },
    }
  }

  pub fn is_query(&self) -> bool {
    matches!(self.kind, EndpointKind::Query { .. })
  }

  /// Tags a successful query with these parameters provides.
  pub fn provided_tags(&self, params: &Value) -> HashSet<Tag> {
    match &self.kind {
      EndpointKind::Query { provides } => provides.iter().filter_map(|t| t.resolve(params)).collect(),
      EndpointKind::Mutation { .. } => HashSet::new(),
    }
  }

  /// Tags a successful mutation with this body invalidates.
  pub fn invalidated_tags(&self, body: &Value) -> Vec<Tag> {
    match &self.kind {
      EndpointKind::Mutation { invalidates } => {
        invalidates.iter().filter_map(|t| t.resolve(body)).collect()
      }
      EndpointKind::Query { .. } => Vec::new(),
    }
  }

  /// Validate query parameters.
  ///
  /// Parameters must be an object (or null), path placeholders must be
  /// present, and pagination values must be positive integers.
  pub fn validate_params(&self, params: &Value) -> Result<(), ValidationError> {
    match params {
      Value::Null | Value::Object(_) => {}
      other => return Err(ValidationError::ParamsNotAnObject(type_name(other).to_string())),
    }
    for param in PAGINATION_PARAMS {
      if let Some(value) = params.get(param) {
        if !value.as_u64().map(|n| n > 0).unwrap_or(false) {
          return Err(ValidationError::InvalidPagination {
            param: param.to_string(),
          });
        }
      }
    }
    for field in self.placeholders() {
      if scalar_param(params, field).is_none() {
        return Err(ValidationError::MissingPathParam {
          endpoint: self.name.to_string(),
          param: field.to_string(),
        });
      }
    }
    Ok(())
  }

  /// Build the request path and body.
  ///
  /// Queries send leftover parameters as a sorted query string. Mutations
  /// send their body as-is; placeholders are read from it when it is an
  /// object.
  pub fn build_request(&self, args: &Value) -> Result<(String, Option<Value>), ValidationError> {
    let mut path = self.path.to_string();
    let placeholders = self.placeholders();
    for field in &placeholders {
      let value = scalar_param(args, field).ok_or_else(|| ValidationError::MissingPathParam {
        endpoint: self.name.to_string(),
        param: field.to_string(),
      })?;
      let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
      path = path.replace(&format!("{{{}}}", field), &encoded);
    }

    if self.is_query() {
      self.validate_params(args)?;
      let mut query = url::form_urlencoded::Serializer::new(String::new());
      let mut appended = false;
      if let Value::Object(map) = args {
        let sorted: BTreeMap<&String, &Value> = map.iter().collect();
        for (key, value) in sorted {
          if placeholders.iter().any(|p| *p == key.as_str()) || value.is_null() {
            continue;
          }
          query.append_pair(key, &query_value(value));
          appended = true;
        }
      }
      if appended {
        path.push('?');
        path.push_str(&query.finish());
      }
      Ok((path, None))
    } else {
      let body = if args.is_null() { None } else { Some(args.clone()) };
      Ok((path, body))
    }
  }

  fn placeholders(&self) -> Vec<&'static str> {
    let mut out = Vec::new();
    let mut rest = self.path;
    while let Some(start) = rest.find('{') {
      match rest[start..].find('}') {
        Some(end) => {
          out.push(&rest[start + 1..start + end]);
          rest = &rest[start + end + 1..];
        }
        None => break,
      }
    }
    out
  }
}

fn scalar_param(args: &Value, field: &str) -> Option<String> {
  match args.get(field)? {
    Value::String(s) if !s.is_empty() => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

fn query_value(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointTableError {
  #[error("Duplicate endpoint {resource}/{endpoint}")]
  Duplicate { resource: String, endpoint: String },

  #[error("{resource}/{endpoint} invalidates {tag}, which no query provides")]
  UnprovidedTag {
    resource: String,
    endpoint: String,
    tag: String,
  },
}

/// Validated lookup table of all endpoints.
#[derive(Debug, Clone)]
pub struct EndpointTable {
  endpoints: BTreeMap<(ResourceName, &'static str), Endpoint>,
}

impl EndpointTable {
  /// Validate and index a set of endpoint declarations.
  pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, EndpointTableError> {
    let mut indexed = BTreeMap::new();
    for endpoint in endpoints {
      let key = (endpoint.resource, endpoint.name);
      if indexed.contains_key(&key) {
        return Err(EndpointTableError::Duplicate {
          resource: endpoint.resource.to_string(),
          endpoint: endpoint.name.to_string(),
        });
      }
      indexed.insert(key, endpoint);
    }

    let provided: Vec<&TagSpec> = indexed
      .values()
      .filter_map(|e| match &e.kind {
        EndpointKind::Query { provides } => Some(provides.iter()),
        EndpointKind::Mutation { .. } => None,
      })
      .flatten()
      .collect();

    for endpoint in indexed.values() {
      if let EndpointKind::Mutation { invalidates } = &endpoint.kind {
        for spec in invalidates {
          if !provided.iter().any(|p| spec.overlaps(p)) {
            return Err(EndpointTableError::UnprovidedTag {
              resource: endpoint.resource.to_string(),
              endpoint: endpoint.name.to_string(),
              tag: spec.to_string(),
            });
          }
        }
      }
    }

    Ok(Self { endpoints: indexed })
  }

  /// The application's endpoint table.
  pub fn standard() -> Result<Self, EndpointTableError> {
    Self::new(standard_endpoints())
  }

  pub fn get(&self, resource: ResourceName, name: &str) -> Result<&Endpoint, ValidationError> {
    self
      .endpoints
      .iter()
      .find(|((r, n), _)| *r == resource && *n == name)
      .map(|(_, e)| e)
      .ok_or_else(|| ValidationError::UnknownEndpoint {
        resource: resource.to_string(),
        endpoint: name.to_string(),
      })
  }

  pub fn for_resource(&self, resource: ResourceName) -> impl Iterator<Item = &Endpoint> {
    self.endpoints.values().filter(move |e| e.resource == resource)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
    self.endpoints.values()
  }
}

/// List, detail, create, update and delete for a plain entity collection.
///
/// Invalidation is whole-list: detail views are tagged with the list tag, so
/// any change to the family refreshes them too.
fn crud(
  resource: ResourceName,
  kind: TagKind,
  names: [&'static str; 5],
  collection: &'static str,
  item: &'static str,
) -> Vec<Endpoint> {
  let [list, detail, create, update, delete] = names;
  let tags = || vec![TagSpec::List(kind)];
  vec![
    Endpoint::query(resource, list, collection, tags()),
    Endpoint::query(resource, detail, item, tags()),
    Endpoint::mutation(resource, create, Method::Post, collection, tags()),
    Endpoint::mutation(resource, update, Method::Put, item, tags()),
    Endpoint::mutation(resource, delete, Method::Delete, item, tags()),
  ]
}

pub(crate) fn standard_endpoints() -> Vec<Endpoint> {
  use ResourceName as R;

  let order_item = || TagSpec::Param {
    kind: TagKind::Orders,
    field: "id",
  };
  let me = || TagSpec::Fixed {
    kind: TagKind::Auth,
    id: "ME",
  };

  let mut endpoints = Vec::new();
  endpoints.extend(crud(
    R::Animals,
    TagKind::Animals,
    ["getAnimals", "getAnimalById", "createAnimals", "updateAnimal", "deleteAnimal"],
    "/api/Animals",
    "/api/Animals/{id}",
  ));
  endpoints.extend(crud(
    R::Events,
    TagKind::Events,
    ["getEvents", "getEventById", "createEvent", "updateEvent", "deleteEvent"],
    "/api/Events",
    "/api/Events/{id}",
  ));
  endpoints.extend(crud(
    R::Habitats,
    TagKind::Habitats,
    ["getHabitats", "getHabitatById", "createHabitat", "updateHabitat", "deleteHabitat"],
    "/api/Habitats",
    "/api/Habitats/{id}",
  ));
  endpoints.extend(crud(
    R::News,
    TagKind::News,
    ["getNews", "getNewsById", "createNews", "updateNews", "deleteNews"],
    "/api/News",
    "/api/News/{id}",
  ));
  endpoints.extend(crud(
    R::Tickets,
    TagKind::Tickets,
    ["getTickets", "getTicketById", "createTicket", "updateTicket", "deleteTicket"],
    "/api/Tickets",
    "/api/Tickets/{id}",
  ));
  endpoints.extend(crud(
    R::Products,
    TagKind::Products,
    ["getProducts", "getProductById", "createProduct", "updateProduct", "deleteProduct"],
    "/api/Products",
    "/api/Products/{id}",
  ));
  endpoints.extend(crud(
    R::Locations,
    TagKind::Locations,
    ["getLocations", "getLocationById", "createLocation", "updateLocation", "deleteLocation"],
    "/api/Locations",
    "/api/Locations/{id}",
  ));

  // Orders are the one family with per-item tags.
  endpoints.extend([
    Endpoint::query(R::Orders, "getOrders", "/api/Orders", vec![TagSpec::List(TagKind::Orders)]),
    Endpoint::query(
      R::Orders,
      "getMyOrders",
      "/api/Orders/my-orders",
      vec![TagSpec::List(TagKind::Orders)],
    ),
    Endpoint::query(R::Orders, "getOrderById", "/api/Orders/{id}", vec![order_item()]),
    Endpoint::query(
      R::Orders,
      "getOrderItems",
      "/api/OrderItems",
      vec![TagSpec::List(TagKind::OrderItems)],
    ),
    Endpoint::mutation(
      R::Orders,
      "createOrder",
      Method::Post,
      "/api/Orders",
      vec![TagSpec::List(TagKind::Orders)],
    ),
    Endpoint::mutation(
      R::Orders,
      "updateOrderStatus",
      Method::Put,
      "/api/Orders/{id}/status",
      vec![TagSpec::List(TagKind::Orders), order_item()],
    ),
    Endpoint::mutation(
      R::Orders,
      "deleteOrder",
      Method::Delete,
      "/api/Orders/{id}",
      vec![TagSpec::List(TagKind::Orders), order_item()],
    ),
    Endpoint::mutation(
      R::Orders,
      "createOrderItems",
      Method::Post,
      "/api/OrderItems",
      vec![TagSpec::List(TagKind::OrderItems), TagSpec::List(TagKind::Orders)],
    ),
    Endpoint::mutation(
      R::Orders,
      "createPayment",
      Method::Post,
      "/api/Orders/{id}/payment",
      vec![order_item()],
    ),
  ]);

  endpoints.extend([
    Endpoint::query(R::Auth, "getProfile", "/api/Users/profile", vec![me()]),
    Endpoint::mutation(R::Auth, "login", Method::Post, "/api/Auth/login", vec![me()]),
    Endpoint::mutation(R::Auth, "register", Method::Post, "/api/Auth/register", vec![]),
    Endpoint::mutation(R::Auth, "verifyOtp", Method::Post, "/api/Auth/verify-otp", vec![me()]),
    Endpoint::mutation(R::Auth, "resendOtp", Method::Post, "/api/Auth/resend-otp", vec![]),
    Endpoint::mutation(
      R::Auth,
      "refreshToken",
      Method::Post,
      "/api/Auth/refresh-token",
      vec![],
    ),
    Endpoint::mutation(R::Auth, "updateProfile", Method::Put, "/api/Users/profile", vec![me()]),
    Endpoint::mutation(
      R::Auth,
      "changePassword",
      Method::Put,
      "/api/Users/change-password",
      vec![],
    ),
  ]);

  endpoints
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn standard_table_validates() {
    let table = EndpointTable::standard().unwrap();
    assert!(table.get(ResourceName::Animals, "getAnimals").unwrap().is_query());
    assert!(!table.get(ResourceName::Animals, "createAnimals").unwrap().is_query());
    assert_eq!(table.for_resource(ResourceName::Auth).count(), 8);
  }

  #[test]
  fn every_resource_has_endpoints() {
    let table = EndpointTable::standard().unwrap();
    for resource in ResourceName::ALL {
      assert!(table.for_resource(resource).any(|e| e.is_query()), "{}", resource);
    }
  }

  #[test]
  fn rejects_invalidation_nobody_provides() {
    let endpoints = vec![
      Endpoint::query(
        ResourceName::News,
        "getNews",
        "/api/News",
        vec![TagSpec::List(TagKind::News)],
      ),
      // Typo: Events instead of News
      Endpoint::mutation(
        ResourceName::News,
        "createNews",
        Method::Post,
        "/api/News",
        vec![TagSpec::List(TagKind::Events)],
      ),
    ];
    let err = EndpointTable::new(endpoints).unwrap_err();
    assert_eq!(
      err,
      EndpointTableError::UnprovidedTag {
        resource: "news".into(),
        endpoint: "createNews".into(),
        tag: "Events:LIST".into(),
      }
    );
  }

  #[test]
  fn rejects_duplicates() {
    let endpoints = vec![
      Endpoint::query(ResourceName::News, "getNews", "/api/News", vec![]),
      Endpoint::query(ResourceName::News, "getNews", "/api/News", vec![]),
    ];
    assert!(matches!(
      EndpointTable::new(endpoints),
      Err(EndpointTableError::Duplicate { .. })
    ));
  }

  #[test]
  fn query_builds_sorted_query_string() {
    let table = EndpointTable::standard().unwrap();
    let endpoint = table.get(ResourceName::Animals, "getAnimals").unwrap();
    let (path, body) = endpoint
      .build_request(&json!({"search": "red panda", "pageSize": 10, "currentPage": 2}))
      .unwrap();
    assert_eq!(path, "/api/Animals?currentPage=2&pageSize=10&search=red+panda");
    assert!(body.is_none());
  }

  #[test]
  fn placeholders_are_filled_and_not_repeated_in_query() {
    let table = EndpointTable::standard().unwrap();
    let endpoint = table.get(ResourceName::Orders, "getOrderById").unwrap();
    let (path, _) = endpoint.build_request(&json!({"id": 42})).unwrap();
    assert_eq!(path, "/api/Orders/42");
  }

  #[test]
  fn mutation_keeps_body() {
    let table = EndpointTable::standard().unwrap();
    let endpoint = table.get(ResourceName::Animals, "createAnimals").unwrap();
    let body = json!([{"name": "Kiwi"}]);
    let (path, sent) = endpoint.build_request(&body).unwrap();
    assert_eq!(path, "/api/Animals");
    assert_eq!(sent, Some(body));
  }

  #[test]
  fn validation_rejects_bad_params() {
    let table = EndpointTable::standard().unwrap();
    let list = table.get(ResourceName::Animals, "getAnimals").unwrap();
    assert!(matches!(
      list.validate_params(&json!([1])),
      Err(ValidationError::ParamsNotAnObject(_))
    ));
    assert!(matches!(
      list.validate_params(&json!({"pageSize": 0})),
      Err(ValidationError::InvalidPagination { .. })
    ));
    assert!(matches!(
      list.validate_params(&json!({"currentPage": "two"})),
      Err(ValidationError::InvalidPagination { .. })
    ));

    let detail = table.get(ResourceName::Animals, "getAnimalById").unwrap();
    assert!(matches!(
      detail.validate_params(&json!({})),
      Err(ValidationError::MissingPathParam { .. })
    ));
  }

  #[test]
  fn order_tags_resolve_from_arguments() {
    let table = EndpointTable::standard().unwrap();
    let detail = table.get(ResourceName::Orders, "getOrderById").unwrap();
    assert!(detail
      .provided_tags(&json!({"id": "o-1"}))
      .contains(&Tag::item(TagKind::Orders, "o-1")));

    let update = table.get(ResourceName::Orders, "updateOrderStatus").unwrap();
    let tags = update.invalidated_tags(&json!({"id": "o-1", "status": "Paid"}));
    assert_eq!(
      tags,
      vec![Tag::list(TagKind::Orders), Tag::item(TagKind::Orders, "o-1")]
    );
  }
}
