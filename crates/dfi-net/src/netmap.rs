//! The seeding graph around one node, for visualisation.

use std::collections::{HashSet, VecDeque};

use dfi_shared::{Address, Entry};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapNode {
    pub id: String,
    pub name: String,
}

/// `source` is the seeded node, `target` the node seeding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapLink {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetMap {
    pub nodes: Vec<MapNode>,
    pub links: Vec<MapLink>,
}

impl NetMap {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Breadth-first walk over `seeding` starting at `start`. Addresses `lookup`
/// cannot resolve are skipped. Every node and link appears once, so cycles
/// terminate.
pub fn create_net_map<F>(start: &Entry, lookup: F) -> NetMap
where
    F: Fn(&Address) -> Option<Entry>,
{
    let mut map = NetMap::default();
    let mut visited: HashSet<Address> = HashSet::new();
    let mut linked: HashSet<(Address, Address)> = HashSet::new();
    let mut queue = VecDeque::new();

    visited.insert(start.address.clone());
    map.nodes.push(node(start));
    queue.push_back(start.clone());

    while let Some(entry) = queue.pop_front() {
        for seeded in &entry.seeding {
            let Some(found) = lookup(seeded) else {
                continue;
            };

            if linked.insert((found.address.clone(), entry.address.clone())) {
                map.links.push(MapLink {
                    source: found.address.encode().to_string(),
                    target: entry.address.encode().to_string(),
                });
            }

            if visited.insert(found.address.clone()) {
                map.nodes.push(node(&found));
                queue.push_back(found);
            }
        }
    }

    map
}

fn node(entry: &Entry) -> MapNode {
    MapNode {
        id: entry.address.encode().to_string(),
        name: entry.name.clone(),
    }
}
