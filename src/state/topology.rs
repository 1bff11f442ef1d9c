//! Network topology tracking.
//!
//! Tracks the spanning tree of remote servers to enable routing and netsplit
//! detection. Every remote server points at its parent in the tree
//! (`near_hop`); servers adjacent to us point at the local server.

use meshirc_proto::ServerRecord;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Information about a remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteServer {
    pub name: String,
    pub description: String,
    /// Hops from the local server; adjacent servers are 1.
    pub hop_count: u32,
    /// The server that introduced this one (its parent in the spanning tree).
    pub near_hop: String,
    /// Servers reachable only through this one.
    pub reachable: BTreeSet<String>,
}

/// Tracks the network topology as a spanning tree rooted at the local server.
#[derive(Debug, Clone)]
pub struct TopologyGraph {
    local: String,
    /// Remote servers keyed by lower-cased name.
    servers: BTreeMap<String, RemoteServer>,
}

fn key(name: &str) -> String {
    name.to_ascii_lowercase()
}

impl TopologyGraph {
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            servers: BTreeMap::new(),
        }
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.local.eq_ignore_ascii_case(name)
    }

    /// Whether `name` is the local server or a known remote one.
    pub fn knows(&self, name: &str) -> bool {
        self.is_local(name) || self.servers.contains_key(&key(name))
    }

    pub fn get(&self, name: &str) -> Option<&RemoteServer> {
        self.servers.get(&key(name))
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Remote servers, nearest first.
    pub fn servers(&self) -> Vec<&RemoteServer> {
        let mut all: Vec<&RemoteServer> = self.servers.values().collect();
        all.sort_by(|a, b| a.hop_count.cmp(&b.hop_count).then(a.name.cmp(&b.name)));
        all
    }

    /// Register a server below `near_hop`.
    ///
    /// Every ancestor up to the local server learns it as reachable.
    pub fn add_server(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        hop_count: u32,
        near_hop: impl Into<String>,
    ) {
        let name = name.into();
        let near_hop = near_hop.into();

        let mut parent = near_hop.clone();
        for _ in 0..=self.servers.len() {
            let Some(server) = self.servers.get_mut(&key(&parent)) else {
                break;
            };
            server.reachable.insert(name.clone());
            parent = server.near_hop.clone();
        }

        self.servers.insert(
            key(&name),
            RemoteServer {
                name,
                description: description.into(),
                hop_count,
                near_hop,
                reachable: BTreeSet::new(),
            },
        );
    }

    /// The adjacent server through which `name` is reached.
    pub fn next_hop(&self, name: &str) -> Option<&RemoteServer> {
        let mut current = self.get(name)?;
        for _ in 0..=self.servers.len() {
            if self.is_local(&current.near_hop) {
                return Some(current);
            }
            current = self.get(&current.near_hop)?;
        }
        None
    }

    /// Whether `name` is `link` or sits behind it.
    pub fn is_behind(&self, name: &str, link: &str) -> bool {
        self.next_hop(name)
            .is_some_and(|hop| hop.name.eq_ignore_ascii_case(link))
    }

    /// `target` and every server that routes through it.
    ///
    /// Used during netsplit cleanup to find all affected servers.
    pub fn get_downstream(&self, target: &str) -> Vec<String> {
        let Some(root) = self.get(target) else {
            return Vec::new();
        };

        let mut result = Vec::new();
        let mut to_process = vec![root.name.clone()];
        let mut processed = HashSet::new();

        while let Some(current) = to_process.pop() {
            if !processed.insert(key(&current)) {
                continue;
            }
            result.push(current.clone());

            for info in self.servers.values() {
                if info.near_hop.eq_ignore_ascii_case(&current)
                    && !processed.contains(&key(&info.name))
                {
                    to_process.push(info.name.clone());
                }
            }
        }

        result
    }

    /// Remove servers and forget them in every `reachable` set.
    pub fn remove_servers(&mut self, names: &[String]) {
        let gone: HashSet<String> = names.iter().map(|n| key(n)).collect();
        self.servers.retain(|k, _| !gone.contains(k));
        for server in self.servers.values_mut() {
            server.reachable.retain(|n| !gone.contains(&key(n)));
        }
    }

    /// Wire record for one server.
    pub fn record(&self, name: &str) -> Option<ServerRecord> {
        self.get(name).map(|s| ServerRecord {
            name: s.name.clone(),
            description: s.description.clone(),
            hop_count: s.hop_count,
            near_hop: s.near_hop.clone(),
            reachable: s.reachable.iter().cloned().collect(),
        })
    }

    /// Records for every remote server, parents before children.
    pub fn records(&self) -> Vec<ServerRecord> {
        self.servers()
            .into_iter()
            .filter_map(|s| self.record(&s.name))
            .collect()
    }

    /// Records for everything below `root`, excluding `root` itself.
    pub fn subtree_records(&self, root: &str) -> Vec<ServerRecord> {
        let mut below: Vec<ServerRecord> = self
            .get_downstream(root)
            .iter()
            .filter(|n| !n.eq_ignore_ascii_case(root))
            .filter_map(|n| self.record(n))
            .collect();
        below.sort_by(|a, b| a.hop_count.cmp(&b.hop_count).then(a.name.cmp(&b.name)));
        below
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> TopologyGraph {
        // Local -> A -> B -> C
        let mut graph = TopologyGraph::new("local");
        graph.add_server("serverA", "", 1, "local");
        graph.add_server("serverB", "", 2, "serverA");
        graph.add_server("serverC", "", 3, "serverB");
        graph
    }

    #[test]
    fn test_downstream_linear() {
        let graph = line();
        // If A disconnects, we lose A, B, and C
        let downstream = graph.get_downstream("serverA");
        assert_eq!(downstream.len(), 3);
        assert!(downstream.contains(&"serverC".to_string()));
        assert!(!downstream.contains(&"local".to_string()));
    }

    #[test]
    fn test_downstream_tree() {
        // Local -> A -> {B, C}, Local -> D
        let mut graph = TopologyGraph::new("local");
        graph.add_server("serverA", "", 1, "local");
        graph.add_server("serverB", "", 2, "serverA");
        graph.add_server("serverC", "", 2, "serverA");
        graph.add_server("serverD", "", 1, "local");

        let downstream = graph.get_downstream("serverA");
        assert_eq!(downstream.len(), 3);
        assert!(!downstream.contains(&"serverD".to_string()));
        assert_eq!(graph.get_downstream("serverD"), vec!["serverD".to_string()]);
    }

    #[test]
    fn test_downstream_unknown_is_empty() {
        assert!(line().get_downstream("nowhere").is_empty());
    }

    #[test]
    fn reachable_sets_follow_ancestors() {
        let graph = line();
        let a = graph.get("servera").unwrap();
        assert_eq!(
            a.reachable,
            BTreeSet::from(["serverB".to_string(), "serverC".to_string()])
        );
        assert!(graph.get("serverC").unwrap().reachable.is_empty());
    }

    #[test]
    fn next_hop_resolves_to_adjacent_server() {
        let graph = line();
        assert_eq!(graph.next_hop("serverC").unwrap().name, "serverA");
        assert_eq!(graph.next_hop("serverA").unwrap().name, "serverA");
        assert!(graph.is_behind("SERVERB", "servera"));
        assert!(graph.next_hop("nowhere").is_none());
    }

    #[test]
    fn remove_servers_prunes_reachable() {
        let mut graph = line();
        let gone = graph.get_downstream("serverC");
        graph.remove_servers(&gone);
        assert!(!graph.knows("serverC"));
        assert_eq!(
            graph.get("serverA").unwrap().reachable,
            BTreeSet::from(["serverB".to_string()])
        );
    }

    #[test]
    fn records_are_ordered_by_hop() {
        let graph = line();
        let names: Vec<_> = graph.records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["serverA", "serverB", "serverC"]);
        let below: Vec<_> = graph
            .subtree_records("serverA")
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(below, vec!["serverB", "serverC"]);
    }
}
