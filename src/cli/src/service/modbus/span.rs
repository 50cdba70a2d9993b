use tokio_modbus::{Address, Quantity};

pub(crate) trait Span {
  fn address(&self) -> Address;

  fn quantity(&self) -> Quantity;

  /// One past the last register covered, widened so it cannot overflow at the
  /// top of the address space.
  fn end(&self) -> u32 {
    self.address() as u32 + self.quantity() as u32
  }
}

impl<TSpan: Span> Span for &TSpan {
  fn address(&self) -> Address {
    (*self).address()
  }

  fn quantity(&self) -> Quantity {
    (*self).quantity()
  }
}

impl<TSpan: Span> Span for std::sync::Arc<TSpan> {
  fn address(&self) -> Address {
    self.as_ref().address()
  }

  fn quantity(&self) -> Quantity {
    self.as_ref().quantity()
  }
}
