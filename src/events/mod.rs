//! Supervision event spine.
//!
//! Every state transition in a supervision tree is published as an
//! [`Event`] on a broadcast [`Bus`]. The bus is the single fan-out point
//! for observability: log writers, test synchronization and metrics all
//! consume the same stream.
//!
//! - **bus.rs**: broadcast channel wrapper (`publish`/`subscribe`)
//! - **event.rs**: [`Event`] and [`EventKind`] definitions

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
