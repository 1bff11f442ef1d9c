//! Netsplit handling.
//!
//! When a link drops, or a peer reports that a server behind it left:
//! - Identifies every server that became unreachable (the blast radius)
//! - Removes all users on those servers, telling local co-members
//! - Removes the servers from the topology
//! - Notifies observers and relays the split onward
//!
//! Splitting a server that is already gone is a no-op.

use crate::error::{LinkError, LinkResult};
use crate::metrics;
use crate::sync::mesh::{Mesh, Outcome, SPLIT_REASON, Target};
use meshirc_proto::LinkMessage;
use tracing::{debug, info};

impl Mesh {
    /// The session for `link` ended. Idempotent.
    pub fn link_closed(&mut self, link: &str, reason: &str) -> Outcome {
        let mut out = Outcome::default();
        let Some(entry) = self.links.remove(&link.to_ascii_lowercase()) else {
            debug!(link = %link, "link already detached");
            return out;
        };
        metrics::link_closed();

        if !entry.bursted {
            // Nothing behind this link was ever merged or announced.
            let gone = self.directory.topology.get_downstream(&entry.name);
            self.directory.topology.remove_servers(&gone);
            info!(link = %entry.name, reason = %reason, "link closed before burst");
            return out;
        }

        if self.split_server(&entry.name, &mut out).is_empty() {
            return out;
        }
        out.relay(
            Target::All,
            LinkMessage::DisconnectServer {
                origin: self.local.clone(),
                name: entry.name.clone(),
                reason: reason.to_string(),
            },
        );
        info!(link = %entry.name, reason = %reason, "link closed");
        out
    }

    /// A peer reports that `name`, somewhere behind it, split off.
    pub fn apply_disconnect(
        &mut self,
        link: &str,
        name: &str,
        reason: &str,
    ) -> LinkResult<Outcome> {
        self.require_bursted(link)?;
        let topology = &self.directory.topology;
        if !topology.knows(name) {
            return Err(LinkError::NoSuchServer(name.to_string()));
        }
        if topology.is_local(name) || name.eq_ignore_ascii_case(link) {
            return Err(LinkError::DataInconsistent(format!(
                "{link} cannot split {name}"
            )));
        }
        if !topology.is_behind(name, link) {
            return Err(LinkError::DataInconsistent(format!(
                "{name} is not behind {link}"
            )));
        }

        let mut out = Outcome::default();
        self.split_server(name, &mut out);
        out.relay(
            Target::AllExcept(link.to_string()),
            LinkMessage::DisconnectServer {
                origin: self.local.clone(),
                name: name.to_string(),
                reason: reason.to_string(),
            },
        );
        info!(server = %name, via = %link, reason = %reason, "remote split");
        Ok(out)
    }

    /// Remove `name`, everything behind it, and their users.
    ///
    /// Returns the removed servers; empty if `name` was already gone.
    pub(crate) fn split_server(&mut self, name: &str, out: &mut Outcome) -> Vec<String> {
        let blast = self.directory.topology.get_downstream(name);
        if blast.is_empty() {
            debug!(server = %name, "split of unknown server ignored");
            return blast;
        }

        let users = self.directory.users_on(&blast);
        for nick in &users {
            self.remove_user_with_notice(nick, SPLIT_REASON, out);
        }
        self.directory.topology.remove_servers(&blast);

        self.notify_split(&blast);
        metrics::record_netsplit(users.len());
        info!(
            server = %name,
            servers_removed = blast.len(),
            users_removed = users.len(),
            "netsplit cleanup complete"
        );
        blast
    }
}

#[cfg(test)]
mod tests {
    use crate::error::LinkError;
    use crate::state::{ClientEvent, MeshObserver};
    use crate::sync::mesh::testing::*;
    use crate::sync::mesh::{Mesh, SPLIT_REASON, Target};
    use meshirc_proto::LinkMessage;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        splits: Mutex<Vec<Vec<String>>>,
    }

    impl MeshObserver for Recorder {
        fn on_merge(&self, _server: &str) {}

        fn on_split(&self, servers: &[String]) {
            self.splits.lock().unwrap().push(servers.to_vec());
        }
    }

    /// a - b - c in a line, one user on each; alice and carol share #all.
    fn line() -> (Mesh, Mesh, Mesh) {
        let clock = ManualClock::new(100);
        let mut a = mesh("a.test", &clock);
        let mut b = mesh("b.test", &clock);
        let mut c = mesh("c.test", &clock);
        register(&mut a, "alice");
        register(&mut b, "bob");
        register(&mut c, "carol");
        join(&mut a, "alice", "#all");
        join(&mut c, "carol", "#all");
        link(&mut a, &mut b);
        let (out_b, _) = link(&mut b, &mut c);
        forward(&out_b, &b, &mut a);
        (a, b, c)
    }

    #[test]
    fn split_removes_only_the_blast_radius() {
        let (mut a, mut b, _c) = line();
        assert_eq!(a.directory().channel("#all").unwrap().members.len(), 2);

        let out_b = b.link_closed("c.test", "connection reset");
        let outs = forward(&out_b, &b, &mut a);

        let dir = a.directory();
        assert!(!dir.topology.knows("c.test"));
        assert!(!dir.has_user("carol"));
        assert!(dir.topology.knows("b.test"));
        assert!(dir.has_user("bob"));
        let quits: Vec<_> = outs.iter().flat_map(|o| o.deliveries.iter()).collect();
        assert_eq!(quits.len(), 1);
        assert_eq!(quits[0].recipients, vec!["alice"]);
        assert!(matches!(
            &quits[0].event,
            ClientEvent::Quit { nick, reason } if nick == "carol" && reason == SPLIT_REASON
        ));
    }

    #[test]
    fn closing_a_link_splits_its_subtree() {
        let (mut a, _b, _c) = line();
        let recorder = Arc::new(Recorder::default());
        a.add_observer(recorder.clone());

        let out = a.link_closed("b.test", "ping timeout");

        assert!(a.directory().topology.is_empty());
        assert_eq!(a.directory().user_count(), 1);
        assert!(a.link("b.test").is_none());
        let splits = recorder.splits.lock().unwrap();
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].len(), 2);
        assert!(out.relays.iter().any(|r| r.target == Target::All
            && matches!(&r.message, LinkMessage::DisconnectServer { name, .. } if name == "b.test")));
    }

    #[test]
    fn split_is_idempotent() {
        let (mut a, _b, _c) = line();
        a.link_closed("b.test", "gone");
        let again = a.link_closed("b.test", "gone");
        assert!(again.is_empty());

        let mut out = Default::default();
        assert!(a.split_server("c.test", &mut out).is_empty());
        assert!(out.is_empty());
    }

    #[test]
    fn unbursted_link_closes_quietly() {
        let clock = ManualClock::new(100);
        let mut a = mesh("a.test", &clock);
        a.attach_link("b.test", "").unwrap();
        let out = a.link_closed("b.test", "eof");
        assert!(out.is_empty());
        assert!(!a.is_known("b.test"));
    }

    #[test]
    fn remote_split_of_unknown_server_is_fatal() {
        let (mut a, _b, _c) = line();
        let err = a
            .apply_disconnect("b.test", "nowhere.test", "bye")
            .unwrap_err();
        assert!(matches!(err, LinkError::NoSuchServer(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn remote_split_must_come_from_the_right_side() {
        let clock = ManualClock::new(100);
        let (mut a, _b, _c) = line();
        let mut d = mesh("d.test", &clock);
        link(&mut a, &mut d);

        assert!(matches!(
            a.apply_disconnect("d.test", "c.test", "bye"),
            Err(LinkError::DataInconsistent(_))
        ));
        assert!(a.directory().topology.knows("c.test"));
    }
}
