//! Global store: the composition root.
//!
//! Holds the session and cart slices next to one [`ResourceCache`] per
//! resource family. [`GlobalStore::dispatch`] is the only way plain state
//! changes: the reducer computes the next state plus a list of effects, and
//! the store applies the effects afterwards, logging each one.
//!
//! Caches never see each other. A mutation whose declared tags belong to
//! another resource family reaches that cache through the same owner
//! routing realtime invalidations take.

mod cart;
mod reducer;
mod session;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{EndpointTable, ResourceName};
use crate::cache::{
  mutex_lock, InvalidationReport, MutationOutcome, QuerySnapshot, ResourceCache, Subscription, Tag,
};
use crate::error::{CacheError, ValidationError};
use crate::persistence::{KeyValueStore, PersistenceError};
use crate::realtime::Invalidation;
use crate::transport::Transport;

pub use cart::{Cart, CartLine, ItemKind};
pub use reducer::{reduce, Action, CartAction, Effect, SessionAction, StoreSnapshot};
pub use session::{Session, UserProfile, SESSION_KEYS};

const SOURCE: &str = "store";

/// Shared handle to the store. Cheap to clone.
#[derive(Clone)]
pub struct GlobalStore {
  inner: Arc<StoreInner>,
}

struct StoreInner {
  endpoints: Arc<EndpointTable>,
  /// Indexed by `ResourceName as usize`, in `ResourceName::ALL` order
  caches: [ResourceCache; 9],
  state: Mutex<StoreSnapshot>,
  persistence: Arc<dyn KeyValueStore>,
  token: watch::Sender<Option<String>>,
}

impl GlobalStore {
  /// `token` feeds the transport interceptor and the hub connection.
  pub fn new(
    endpoints: Arc<EndpointTable>,
    transport: Arc<dyn Transport>,
    persistence: Arc<dyn KeyValueStore>,
    token: watch::Sender<Option<String>>,
    retention: chrono::Duration,
  ) -> Self {
    let caches = ResourceName::ALL.map(|resource| {
      ResourceCache::new(
        resource,
        Arc::clone(&endpoints),
        Arc::clone(&transport),
        retention,
      )
    });

    Self {
      inner: Arc::new(StoreInner {
        endpoints,
        caches,
        state: Mutex::new(StoreSnapshot::default()),
        persistence,
        token,
      }),
    }
  }

  pub fn endpoints(&self) -> &EndpointTable {
    &self.inner.endpoints
  }

  pub fn cache(&self, resource: ResourceName) -> &ResourceCache {
    &self.inner.caches[resource as usize]
  }

  pub fn snapshot(&self) -> StoreSnapshot {
    mutex_lock(&self.inner.state, SOURCE, "snapshot").clone()
  }

  pub fn token(&self) -> watch::Receiver<Option<String>> {
    self.inner.token.subscribe()
  }

  /// Run one action through the reducer and apply its effects.
  pub fn dispatch(&self, action: Action) -> StoreSnapshot {
    let (next, effects) = {
      let mut state = mutex_lock(&self.inner.state, SOURCE, "dispatch");
      let (next, effects) = reduce(std::mem::take(&mut *state), action);
      *state = next.clone();
      (next, effects)
    };

    for effect in effects {
      self.apply(effect);
    }
    next
  }

  fn apply(&self, effect: Effect) {
    match effect {
      Effect::PersistSession(session) => match session.persist(self.inner.persistence.as_ref()) {
        Ok(()) => debug!(effect = "persist_session", "Session mirrored"),
        Err(e) => warn!(effect = "persist_session", error = %e, "Could not mirror session"),
      },
      Effect::ClearPersistedSession => match Session::clear(self.inner.persistence.as_ref()) {
        Ok(()) => debug!(effect = "clear_session", "Session mirror cleared"),
        Err(e) => warn!(effect = "clear_session", error = %e, "Could not clear session mirror"),
      },
      Effect::InvalidateTags(tags) => {
        let report = self.route_invalidation(&tags, None);
        debug!(
          effect = "invalidate_tags",
          tags = ?tags.iter().map(Tag::to_string).collect::<Vec<_>>(),
          touched = report.touched(),
          "Invalidation routed"
        );
      }
      Effect::ResetCaches => {
        for cache in &self.inner.caches {
          cache.reset();
        }
        debug!(effect = "reset_caches", "All caches reset");
      }
      Effect::PublishToken(token) => {
        let present = token.is_some();
        self.inner.token.send_replace(token);
        debug!(effect = "publish_token", present, "Token published");
      }
    }
  }

  /// Hand each tag to the cache owning its resource type.
  ///
  /// `written` holds each cache's fetch mark from before a write was sent;
  /// without it the invalidation comes from a server event.
  fn route_invalidation(&self, tags: &[Tag], written: Option<&[u64; 9]>) -> InvalidationReport {
    let mut by_owner: BTreeMap<ResourceName, Vec<Tag>> = BTreeMap::new();
    for tag in tags {
      by_owner
        .entry(ResourceName::owning(tag.kind))
        .or_default()
        .push(tag.clone());
    }

    let mut report = InvalidationReport::default();
    for (resource, tags) in by_owner {
      let cache = self.cache(resource);
      report.merge(match written {
        Some(marks) => cache.invalidate_written(&tags, marks[resource as usize]),
        None => cache.invalidate_tags(&tags),
      });
    }
    report
  }

  pub async fn query(
    &self,
    resource: ResourceName,
    endpoint: &str,
    params: Value,
  ) -> Result<QuerySnapshot, CacheError> {
    self.cache(resource).query(endpoint, params).await
  }

  pub fn subscribe(
    &self,
    resource: ResourceName,
    endpoint: &str,
    params: Value,
  ) -> Result<Subscription, CacheError> {
    self.cache(resource).subscribe(endpoint, params)
  }

  /// Run a mutation. Tags owned by other resource families are routed to
  /// their caches once the mutation has succeeded, and count in the
  /// returned report.
  pub async fn mutate(
    &self,
    resource: ResourceName,
    endpoint: &str,
    body: Value,
  ) -> Result<MutationOutcome, CacheError> {
    let marks = ResourceName::ALL.map(|r| self.cache(r).fetch_mark());
    let mut outcome = self.cache(resource).mutate(endpoint, body).await?;

    let foreign: Vec<Tag> = outcome
      .invalidated
      .iter()
      .filter(|tag| ResourceName::owning(tag.kind) != resource)
      .cloned()
      .collect();
    if !foreign.is_empty() {
      let report = self.route_invalidation(&foreign, Some(&marks));
      debug!(
        %resource,
        endpoint,
        tags = ?foreign.iter().map(Tag::to_string).collect::<Vec<_>>(),
        touched = report.touched(),
        "Foreign tags routed"
      );
      outcome.report.merge(report);
    }
    Ok(outcome)
  }

  /// Log in with email and password.
  ///
  /// `None` when the server answered without tokens and wants an OTP
  /// first (see [`verify_otp`](Self::verify_otp)).
  pub async fn login(&self, email: &str, password: &str) -> Result<Option<Session>, CacheError> {
    let outcome = self
      .mutate(
        ResourceName::Auth,
        "login",
        json!({"email": email, "password": password}),
      )
      .await?;

    match Session::from_auth_response(&outcome.data) {
      Ok(session) => {
        self.dispatch(Action::Session(SessionAction::LoggedIn(session.clone())));
        info!(role = ?session.role, "Logged in");
        Ok(Some(session))
      }
      Err(_) => {
        info!("Login accepted, OTP verification required");
        Ok(None)
      }
    }
  }

  pub async fn verify_otp(&self, email: &str, code: &str) -> Result<Session, CacheError> {
    let outcome = self
      .mutate(
        ResourceName::Auth,
        "verifyOtp",
        json!({"email": email, "otp": code}),
      )
      .await?;

    let session = Session::from_auth_response(&outcome.data)?;
    self.dispatch(Action::Session(SessionAction::LoggedIn(session.clone())));
    info!(role = ?session.role, "OTP verified, logged in");
    Ok(session)
  }

  /// Exchange the refresh token for a new access token.
  pub async fn refresh_session(&self) -> Result<Session, CacheError> {
    let refresh_token = self
      .snapshot()
      .session
      .and_then(|s| s.refresh_token)
      .ok_or(ValidationError::MissingField("refreshToken"))?;

    let outcome = self
      .mutate(
        ResourceName::Auth,
        "refreshToken",
        json!({"refreshToken": refresh_token}),
      )
      .await?;
    let refreshed = Session::from_auth_response(&outcome.data)?;

    let state = self.dispatch(Action::Session(SessionAction::TokensRefreshed {
      access_token: refreshed.access_token,
      refresh_token: refreshed.refresh_token,
    }));
    debug!("Session tokens refreshed");
    state
      .session
      .ok_or_else(|| ValidationError::MissingField("session").into())
  }

  /// Update the profile on the server and in the session slice.
  pub async fn update_profile(&self, changes: Value) -> Result<MutationOutcome, CacheError> {
    let outcome = self
      .mutate(ResourceName::Auth, "updateProfile", changes.clone())
      .await?;

    let source = if outcome.data.is_object() {
      &outcome.data
    } else {
      &changes
    };
    self.dispatch(Action::Session(SessionAction::ProfileUpdated(
      UserProfile::from_value(source),
    )));
    Ok(outcome)
  }

  pub fn logout(&self) -> StoreSnapshot {
    info!("Logging out");
    self.dispatch(Action::Session(SessionAction::LoggedOut))
  }

  /// Load the mirrored session, if any, and publish its token.
  pub fn restore_session(&self) -> Result<Option<Session>, PersistenceError> {
    let restored = Session::restore(self.inner.persistence.as_ref())?;
    match &restored {
      Some(session) => {
        self.dispatch(Action::Session(SessionAction::Restored(session.clone())));
        info!(role = ?session.role, "Session restored");
      }
      None => debug!("No stored session"),
    }
    Ok(restored)
  }

  /// Apply realtime invalidations in the order they were received.
  pub fn spawn_invalidation_pump(
    &self,
    mut messages: mpsc::UnboundedReceiver<Invalidation>,
  ) -> JoinHandle<()> {
    let store = self.clone();
    tokio::spawn(async move {
      while let Some(message) = messages.recv().await {
        debug!(event = message.event, "Applying realtime invalidation");
        store.dispatch(Action::InvalidateTags(message.tags));
      }
      debug!("Invalidation pump stopped");
    })
  }

  /// One garbage collection task per resource cache.
  pub fn spawn_gc(&self, every: StdDuration) -> Vec<JoinHandle<()>> {
    self
      .inner
      .caches
      .iter()
      .map(|cache| cache.spawn_gc(every))
      .collect()
  }
}
