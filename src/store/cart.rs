//! Locally-held cart: tickets and products chosen before checkout.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
  Ticket,
  Product,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
  pub kind: ItemKind,
  pub item_id: String,
  pub name: String,
  pub unit_price_cents: u64,
  pub quantity: u32,
}

impl CartLine {
  pub fn subtotal_cents(&self) -> u64 {
    self.unit_price_cents.saturating_mul(u64::from(self.quantity))
  }

  fn is(&self, kind: ItemKind, item_id: &str) -> bool {
    self.kind == kind && self.item_id == item_id
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Cart {
  lines: Vec<CartLine>,
}

impl Cart {
  pub fn lines(&self) -> &[CartLine] {
    &self.lines
  }

  pub fn is_empty(&self) -> bool {
    self.lines.is_empty()
  }

  /// Adding an item already in the cart bumps its quantity.
  pub fn add(&mut self, line: CartLine) {
    if line.quantity == 0 {
      return;
    }
    match self.lines.iter_mut().find(|l| l.is(line.kind, &line.item_id)) {
      Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
      None => self.lines.push(line),
    }
  }

  /// Zero removes the line.
  pub fn set_quantity(&mut self, kind: ItemKind, item_id: &str, quantity: u32) {
    if quantity == 0 {
      self.remove(kind, item_id);
    } else if let Some(line) = self.lines.iter_mut().find(|l| l.is(kind, item_id)) {
      line.quantity = quantity;
    }
  }

  pub fn remove(&mut self, kind: ItemKind, item_id: &str) {
    self.lines.retain(|l| !l.is(kind, item_id));
  }

  pub fn clear(&mut self) {
    self.lines.clear();
  }

  pub fn item_count(&self) -> u32 {
    self.lines.iter().map(|l| l.quantity).sum()
  }

  pub fn total_cents(&self) -> u64 {
    self.lines.iter().map(CartLine::subtotal_cents).sum()
  }
}
