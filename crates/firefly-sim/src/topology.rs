//! Link topology: who hears whom, and how loudly.

use std::collections::BTreeMap;

/// Undirected radio links with a per-link RSSI (dBm).
///
/// Links are symmetric: `add_link(a, b, rssi)` makes each endpoint hear the
/// other at the same strength. Adjacency is kept in id order so delivery
/// fan-out is deterministic.
#[derive(Debug, Clone, Default)]
pub struct LinkTopology {
    links: BTreeMap<(u32, u32), i8>,
}

impl LinkTopology {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(a: u32, b: u32) -> (u32, u32) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Connect two nodes at the given signal strength.
    pub fn add_link(&mut self, a: u32, b: u32, rssi: i8) {
        if a == b {
            return;
        }
        self.links.insert(Self::key(a, b), rssi);
    }

    /// Remove a link; silently ignores unknown pairs.
    pub fn remove_link(&mut self, a: u32, b: u32) {
        self.links.remove(&Self::key(a, b));
    }

    pub fn are_linked(&self, a: u32, b: u32) -> bool {
        self.links.contains_key(&Self::key(a, b))
    }

    pub fn link_rssi(&self, a: u32, b: u32) -> Option<i8> {
        self.links.get(&Self::key(a, b)).copied()
    }

    /// All nodes adjacent to `node`, ascending by id.
    pub fn neighbors_of(&self, node: u32) -> Vec<(u32, i8)> {
        let mut out: Vec<(u32, i8)> = self
            .links
            .iter()
            .filter_map(|(&(a, b), &rssi)| {
                if a == node {
                    Some((b, rssi))
                } else if b == node {
                    Some((a, rssi))
                } else {
                    None
                }
            })
            .collect();
        out.sort_unstable_by_key(|&(id, _)| id);
        out
    }

    pub fn degree(&self, node: u32) -> usize {
        self.neighbors_of(node).len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Chain the given nodes into a line: each consecutive pair is linked.
    pub fn line(ids: &[u32], rssi: i8) -> Self {
        let mut topology = Self::new();
        for pair in ids.windows(2) {
            topology.add_link(pair[0], pair[1], rssi);
        }
        topology
    }

    /// Link `center` to every satellite.
    pub fn star(center: u32, satellites: &[u32], rssi: i8) -> Self {
        let mut topology = Self::new();
        for &s in satellites {
            topology.add_link(center, s, rssi);
        }
        topology
    }

    /// Merge another topology's links into this one.
    pub fn merge(&mut self, other: &LinkTopology) {
        for (&(a, b), &rssi) in &other.links {
            self.links.insert((a, b), rssi);
        }
    }
}
