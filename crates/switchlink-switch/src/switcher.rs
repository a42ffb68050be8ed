//! Tracks which client is active and decides when cursor motion on the
//! primary screen crosses into a neighbour. This is the "switcher" named in
//! the switching design: a pure decision-maker over [`NeighbourResolver`]
//! results, independent of the connection table or transport that carries
//! out what it decides.

use std::collections::HashMap;

use switchlink_events::ConnectionId;
use switchlink_wire::{KeyModifierMask, Message};
use tracing::warn;

use crate::topology::{Edge, NeighbourResolver};

/// Which screen currently owns the keyboard and mouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Active {
    Local,
    Remote(ConnectionId),
}

/// What happened as a result of feeding the switcher one primary-screen
/// motion report.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchOutcome {
    /// No edge crossing, or a crossing with nothing configured beyond it.
    Stayed,
    /// The cursor crossed into `connection`'s screen; send `enter` to it
    /// (and `COUT` to whichever client was active before, if any).
    SwitchedToRemote { connection: ConnectionId, enter: Message },
}

/// Generic over `R` so the default [`crate::GridTopology`] and a
/// caller-supplied closure both work without a trait object in the common
/// case; reach for `Box<dyn NeighbourResolver>` only if the resolver needs
/// to be swapped at runtime.
pub struct Switcher<R> {
    local_screen: String,
    resolver: R,
    clients: HashMap<String, ConnectionId>,
    active: Active,
    enter_seq: u32,
}

impl<R: NeighbourResolver> Switcher<R> {
    pub fn new(local_screen: impl Into<String>, resolver: R) -> Self {
        Self {
            local_screen: local_screen.into(),
            resolver,
            clients: HashMap::new(),
            active: Active::Local,
            enter_seq: 0,
        }
    }

    pub fn register_client(&mut self, name: impl Into<String>, connection: ConnectionId) {
        self.clients.insert(name.into(), connection);
    }

    /// Direct access to the resolver, so a caller can grow the topology as
    /// clients report their screen geometry (see `DINF` in the connection
    /// design) instead of requiring it fully known up front.
    pub fn resolver_mut(&mut self) -> &mut R {
        &mut self.resolver
    }

    /// Drops a disconnected client from the routing table. If it was
    /// active, control reverts to the local screen: a fatal connection
    /// error falls back to the server's own screen per the error design.
    pub fn unregister_client(&mut self, connection: ConnectionId) {
        self.clients.retain(|_, c| *c != connection);
        if self.active == Active::Remote(connection) {
            self.active = Active::Local;
        }
    }

    pub fn active(&self) -> Active {
        self.active
    }

    /// The connection, if any, that forwarded key/button/motion/clipboard
    /// traffic should currently be routed to.
    pub fn route_target(&self) -> Option<ConnectionId> {
        match self.active {
            Active::Local => None,
            Active::Remote(c) => Some(c),
        }
    }

    /// Feeds the server's own cursor motion while it owns the screen.
    /// `(width, height)` is the primary screen's shape; a position outside
    /// `[0, width) x [0, height)` is a crossing, resolved against the
    /// topology for a neighbour to switch to.
    pub fn on_primary_motion(
        &mut self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        mask: KeyModifierMask,
    ) -> SwitchOutcome {
        if self.active != Active::Local {
            return SwitchOutcome::Stayed;
        }

        let edge = if x < 0 {
            Edge::Left
        } else if x >= width {
            Edge::Right
        } else if y < 0 {
            Edge::Top
        } else if y >= height {
            Edge::Bottom
        } else {
            return SwitchOutcome::Stayed;
        };

        let on_axis_x = x.clamp(0, (width - 1).max(0));
        let on_axis_y = y.clamp(0, (height - 1).max(0));
        let Some((name, entry_x, entry_y)) =
            self.resolver.resolve(&self.local_screen, edge, on_axis_x, on_axis_y)
        else {
            return SwitchOutcome::Stayed;
        };
        let Some(&connection) = self.clients.get(&name) else {
            warn!(screen = %name, "switchlink-switch: topology names a screen with no connected client");
            return SwitchOutcome::Stayed;
        };

        self.enter_seq += 1;
        self.active = Active::Remote(connection);
        SwitchOutcome::SwitchedToRemote {
            connection,
            enter: Message::Enter { x: entry_x, y: entry_y, seq: self.enter_seq, mask },
        }
    }

    /// Forces control back to the local screen, returning the connection
    /// that was active (so the caller can send it `COUT`), if any.
    pub fn return_to_local(&mut self) -> Option<ConnectionId> {
        match std::mem::replace(&mut self.active, Active::Local) {
            Active::Local => None,
            Active::Remote(c) => Some(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{GridTopology, ScreenGeometry};

    fn wired_switcher() -> (Switcher<GridTopology>, ConnectionId) {
        let mut topo = GridTopology::new();
        topo.add_screen("server", ScreenGeometry { grid_x: 0, grid_y: 0, width: 1920, height: 1080 });
        topo.add_screen("client-right", ScreenGeometry { grid_x: 1, grid_y: 0, width: 1280, height: 1024 });
        let mut switcher = Switcher::new("server", topo);
        let conn = ConnectionId::new(0, 1);
        switcher.register_client("client-right", conn);
        (switcher, conn)
    }

    #[test]
    fn crossing_right_edge_switches_and_enters_at_x_zero() {
        let (mut switcher, conn) = wired_switcher();
        let outcome = switcher.on_primary_motion(1920, 500, 1920, 1080, KeyModifierMask::empty());
        match outcome {
            SwitchOutcome::SwitchedToRemote { connection, enter: Message::Enter { x, y, seq, .. } } => {
                assert_eq!(connection, conn);
                assert_eq!((x, y), (0, 500));
                assert_eq!(seq, 1);
            }
            other => panic!("expected a switch, got {other:?}"),
        }
        assert_eq!(switcher.active(), Active::Remote(conn));
        assert_eq!(switcher.route_target(), Some(conn));
    }

    #[test]
    fn motion_within_bounds_never_switches() {
        let (mut switcher, _conn) = wired_switcher();
        let outcome = switcher.on_primary_motion(960, 540, 1920, 1080, KeyModifierMask::empty());
        assert_eq!(outcome, SwitchOutcome::Stayed);
        assert_eq!(switcher.active(), Active::Local);
    }

    #[test]
    fn motion_is_ignored_while_a_remote_client_is_active() {
        let (mut switcher, conn) = wired_switcher();
        switcher.on_primary_motion(1920, 500, 1920, 1080, KeyModifierMask::empty());
        assert_eq!(switcher.active(), Active::Remote(conn));

        let outcome = switcher.on_primary_motion(-5, 500, 1920, 1080, KeyModifierMask::empty());
        assert_eq!(outcome, SwitchOutcome::Stayed);
        assert_eq!(switcher.active(), Active::Remote(conn));
    }

    #[test]
    fn disconnecting_the_active_client_falls_back_to_local() {
        let (mut switcher, conn) = wired_switcher();
        switcher.on_primary_motion(1920, 500, 1920, 1080, KeyModifierMask::empty());
        switcher.unregister_client(conn);
        assert_eq!(switcher.active(), Active::Local);
        assert_eq!(switcher.route_target(), None);
    }

    #[test]
    fn return_to_local_reports_the_previously_active_connection() {
        let (mut switcher, conn) = wired_switcher();
        switcher.on_primary_motion(1920, 500, 1920, 1080, KeyModifierMask::empty());
        assert_eq!(switcher.return_to_local(), Some(conn));
        assert_eq!(switcher.active(), Active::Local);
        assert_eq!(switcher.return_to_local(), None);
    }
}
