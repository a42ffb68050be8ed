//! Server-side switching logic: which client is active, when a cursor
//! crossing hands control to a neighbour, and the platform capability
//! ([`Screen`]) that carries out what the switch decided.
//!
//! Transport-agnostic like `switchlink-proto`: `Switcher` never touches a
//! socket, a `Connection`, or an event loop directly — `switchlink-server`
//! wires this crate's decisions to actual connections.

mod screen;
mod switcher;
mod topology;

pub use screen::{Screen, ScreenEvent};
pub use switcher::{Active, SwitchOutcome, Switcher};
pub use topology::{Edge, GridTopology, NeighbourResolver, ScreenGeometry};
