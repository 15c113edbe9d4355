//! Pure state transitions.
//!
//! `reduce` never touches the outside world. Anything that has to happen
//! beyond the new state comes back as an [`Effect`] for the store to apply.

use super::cart::{Cart, CartLine, ItemKind};
use super::session::{Session, UserProfile};
use crate::cache::Tag;

/// Plain application state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
  pub session: Option<Session>,
  pub cart: Cart,
}

impl StoreSnapshot {
  pub fn access_token(&self) -> Option<&str> {
    self.session.as_ref().map(|s| s.access_token.as_str())
  }

  pub fn is_logged_in(&self) -> bool {
    self.session.is_some()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
  LoggedIn(Session),
  /// Session read back from the mirror at startup
  Restored(Session),
  TokensRefreshed {
    access_token: String,
    refresh_token: Option<String>,
  },
  ProfileUpdated(UserProfile),
  LoggedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartAction {
  Add(CartLine),
  SetQuantity {
    kind: ItemKind,
    item_id: String,
    quantity: u32,
  },
  Remove {
    kind: ItemKind,
    item_id: String,
  },
  Clear,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
  Session(SessionAction),
  Cart(CartAction),
  InvalidateTags(Vec<Tag>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
  PersistSession(Session),
  ClearPersistedSession,
  /// Routed to the cache owning each tag's resource type
  InvalidateTags(Vec<Tag>),
  /// Drop every cache entry in every resource cache
  ResetCaches,
  /// New bearer token for the transport and hub
  PublishToken(Option<String>),
}

pub fn reduce(mut state: StoreSnapshot, action: Action) -> (StoreSnapshot, Vec<Effect>) {
  let effects = match action {
    Action::Session(action) => reduce_session(&mut state, action),
    Action::Cart(action) => {
      reduce_cart(&mut state.cart, action);
      Vec::new()
    }
    Action::InvalidateTags(tags) if tags.is_empty() => Vec::new(),
    Action::InvalidateTags(tags) => vec![Effect::InvalidateTags(tags)],
  };
  (state, effects)
}

fn reduce_session(state: &mut StoreSnapshot, action: SessionAction) -> Vec<Effect> {
  match action {
    SessionAction::LoggedIn(session) => {
      let token = session.access_token.clone();
      state.session = Some(session.clone());
      // Entries fetched under the previous identity are refetched with
      // the new token.
      vec![
        Effect::PersistSession(session),
        Effect::PublishToken(Some(token)),
        Effect::ResetCaches,
      ]
    }
    SessionAction::Restored(session) => {
      let token = session.access_token.clone();
      state.session = Some(session);
      vec![Effect::PublishToken(Some(token))]
    }
    SessionAction::TokensRefreshed {
      access_token,
      refresh_token,
    } => {
      let Some(session) = state.session.as_mut() else {
        return Vec::new();
      };
      session.access_token = access_token.clone();
      if refresh_token.is_some() {
        session.refresh_token = refresh_token;
      }
      vec![
        Effect::PersistSession(session.clone()),
        Effect::PublishToken(Some(access_token)),
      ]
    }
    SessionAction::ProfileUpdated(profile) => {
      let Some(session) = state.session.as_mut() else {
        return Vec::new();
      };
      session.user.merge(profile);
      vec![Effect::PersistSession(session.clone())]
    }
    SessionAction::LoggedOut => {
      state.session = None;
      state.cart.clear();
      vec![
        Effect::ClearPersistedSession,
        Effect::PublishToken(None),
        Effect::ResetCaches,
      ]
    }
  }
}

fn reduce_cart(cart: &mut Cart, action: CartAction) {
  match action {
    CartAction::Add(line) => cart.add(line),
    CartAction::SetQuantity {
      kind,
      item_id,
      quantity,
    } => cart.set_quantity(kind, &item_id, quantity),
    CartAction::Remove { kind, item_id } => cart.remove(kind, &item_id),
    CartAction::Clear => cart.clear(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::TagKind;

  fn session(token: &str) -> Session {
    Session {
      access_token: token.into(),
      refresh_token: Some("r-1".into()),
      role: Some("Customer".into()),
      user: UserProfile::default(),
    }
  }

  fn logged_in() -> StoreSnapshot {
    reduce(
      StoreSnapshot::default(),
      Action::Session(SessionAction::LoggedIn(session("a-1"))),
    )
    .0
  }

  #[test]
  fn login_persists_and_publishes() {
    let (state, effects) = reduce(
      StoreSnapshot::default(),
      Action::Session(SessionAction::LoggedIn(session("a-1"))),
    );
    assert_eq!(state.access_token(), Some("a-1"));
    assert_eq!(
      effects,
      vec![
        Effect::PersistSession(session("a-1")),
        Effect::PublishToken(Some("a-1".into())),
        Effect::ResetCaches,
      ]
    );
  }

  #[test]
  fn restore_does_not_write_back() {
    let (state, effects) = reduce(
      StoreSnapshot::default(),
      Action::Session(SessionAction::Restored(session("a-1"))),
    );
    assert!(state.is_logged_in());
    assert_eq!(effects, vec![Effect::PublishToken(Some("a-1".into()))]);
  }

  #[test]
  fn refresh_keeps_refresh_token_when_absent() {
    let (state, effects) = reduce(
      logged_in(),
      Action::Session(SessionAction::TokensRefreshed {
        access_token: "a-2".into(),
        refresh_token: None,
      }),
    );
    let current = state.session.clone().unwrap();
    assert_eq!(current.access_token, "a-2");
    assert_eq!(current.refresh_token.as_deref(), Some("r-1"));
    assert_eq!(effects[1], Effect::PublishToken(Some("a-2".into())));
  }

  #[test]
  fn session_updates_without_session_are_noops() {
    let (state, effects) = reduce(
      StoreSnapshot::default(),
      Action::Session(SessionAction::TokensRefreshed {
        access_token: "a-2".into(),
        refresh_token: None,
      }),
    );
    assert_eq!(state, StoreSnapshot::default());
    assert!(effects.is_empty());
  }

  #[test]
  fn logout_clears_session_cart_and_caches() {
    let mut state = logged_in();
    state.cart.add(CartLine {
      kind: ItemKind::Ticket,
      item_id: "adult".into(),
      name: "Adult".into(),
      unit_price_cents: 2500,
      quantity: 1,
    });

    let (state, effects) = reduce(state, Action::Session(SessionAction::LoggedOut));
    assert!(!state.is_logged_in());
    assert!(state.cart.is_empty());
    assert_eq!(
      effects,
      vec![
        Effect::ClearPersistedSession,
        Effect::PublishToken(None),
        Effect::ResetCaches,
      ]
    );
  }

  #[test]
  fn invalidation_is_passed_through_as_effect() {
    let tags = vec![Tag::list(TagKind::Animals)];
    let (state, effects) = reduce(StoreSnapshot::default(), Action::InvalidateTags(tags.clone()));
    assert_eq!(state, StoreSnapshot::default());
    assert_eq!(effects, vec![Effect::InvalidateTags(tags)]);

    let (_, effects) = reduce(StoreSnapshot::default(), Action::InvalidateTags(Vec::new()));
    assert!(effects.is_empty());
  }

  #[test]
  fn cart_actions_have_no_effects() {
    let (state, effects) = reduce(
      StoreSnapshot::default(),
      Action::Cart(CartAction::Add(CartLine {
        kind: ItemKind::Product,
        item_id: "plush".into(),
        name: "Plush lion".into(),
        unit_price_cents: 1500,
        quantity: 2,
      })),
    );
    assert_eq!(state.cart.item_count(), 2);
    assert!(effects.is_empty());
  }
}
