//! The switching boundary named in the switching design: which edge a
//! cursor crossed, and the pure function that resolves a crossing to a
//! neighbouring screen. Edge configuration and neighbour lookup are out of
//! the core's scope; [`NeighbourResolver`] is the contracted interface, and
//! [`GridTopology`] is the one concrete implementation this crate ships.

use std::collections::HashMap;

/// Screen edge a cursor can cross to trigger a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Left,
    Right,
    Top,
    Bottom,
}

/// `(screen_name, edge, x, y) -> (neighbour_name, entry_x, entry_y)`.
///
/// Implemented for any matching closure as well as for [`GridTopology`], so
/// a caller with its own config format can pass a plain `Fn` without
/// wrapping it in a type.
pub trait NeighbourResolver: Send {
    fn resolve(&self, screen: &str, edge: Edge, x: i32, y: i32) -> Option<(String, i32, i32)>;
}

impl<F> NeighbourResolver for F
where
    F: Fn(&str, Edge, i32, i32) -> Option<(String, i32, i32)> + Send,
{
    fn resolve(&self, screen: &str, edge: Edge, x: i32, y: i32) -> Option<(String, i32, i32)> {
        self(screen, edge, x, y)
    }
}

/// One screen's position (in screen-grid units, not pixels) and pixel size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub grid_x: i32,
    pub grid_y: i32,
    pub width: i32,
    pub height: i32,
}

/// A simple 2D grid of named screens — the kind of topology a `barrier.conf`
/// or GUI would otherwise describe, which are themselves out of scope here.
/// Resolves a crossing by table lookup for the adjacent grid cell, then
/// wraps the cursor's off-axis coordinate onto the entry edge of the
/// neighbour.
///
/// Grounded on the cursor-switch scenario: a server at grid `(0, 0)` with a
/// 1920-wide screen, a client at grid `(1, 0)`, and a rightward crossing at
/// `y=500` resolves to the client entering at `(0, 500)`.
#[derive(Debug, Clone, Default)]
pub struct GridTopology {
    screens: HashMap<String, ScreenGeometry>,
}

impl GridTopology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_screen(&mut self, name: impl Into<String>, geometry: ScreenGeometry) {
        self.screens.insert(name.into(), geometry);
    }

    fn neighbour_grid_pos(from: ScreenGeometry, edge: Edge) -> (i32, i32) {
        match edge {
            Edge::Left => (from.grid_x - 1, from.grid_y),
            Edge::Right => (from.grid_x + 1, from.grid_y),
            Edge::Top => (from.grid_x, from.grid_y - 1),
            Edge::Bottom => (from.grid_x, from.grid_y + 1),
        }
    }
}

impl NeighbourResolver for GridTopology {
    fn resolve(&self, screen: &str, edge: Edge, x: i32, y: i32) -> Option<(String, i32, i32)> {
        let from = *self.screens.get(screen)?;
        let (target_gx, target_gy) = Self::neighbour_grid_pos(from, edge);
        let (name, to) =
            self.screens.iter().find(|(_, g)| g.grid_x == target_gx && g.grid_y == target_gy)?;

        let (entry_x, entry_y) = match edge {
            Edge::Left => (to.width.saturating_sub(1), y),
            Edge::Right => (0, y),
            Edge::Top => (x, to.height.saturating_sub(1)),
            Edge::Bottom => (x, 0),
        };
        Some((name.clone(), entry_x, entry_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_topology() -> GridTopology {
        let mut t = GridTopology::new();
        t.add_screen("server", ScreenGeometry { grid_x: 0, grid_y: 0, width: 1920, height: 1080 });
        t.add_screen("client-right", ScreenGeometry { grid_x: 1, grid_y: 0, width: 1280, height: 1024 });
        t
    }

    #[test]
    fn rightward_crossing_enters_neighbour_at_x_zero() {
        let topo = scenario_topology();
        let (name, x, y) = topo.resolve("server", Edge::Right, 1920, 500).unwrap();
        assert_eq!(name, "client-right");
        assert_eq!((x, y), (0, 500));
    }

    #[test]
    fn leftward_crossing_from_the_neighbour_enters_server_at_its_right_edge() {
        let topo = scenario_topology();
        let (name, x, y) = topo.resolve("client-right", Edge::Left, -1, 500).unwrap();
        assert_eq!(name, "server");
        assert_eq!((x, y), (1919, 500));
    }

    #[test]
    fn edge_with_no_configured_neighbour_resolves_to_none() {
        let topo = scenario_topology();
        assert!(topo.resolve("server", Edge::Left, -1, 500).is_none());
    }
}
