//! Flutter-facing bindings for the Eisenhower task store.

pub mod api;
