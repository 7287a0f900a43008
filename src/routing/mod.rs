//! Routing: the learned soft assignment of tokens to expert slots.

pub mod router;
