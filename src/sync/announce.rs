//! Propagated server announcements.
//!
//! A server that merges a new peer's burst tells every other link about the
//! peer's subtree with `NEWSERVER`. Receivers re-validate strictly: by the
//! time an announcement travels, collisions were already settled by the
//! burst, so anything that does not fit means the views have diverged and
//! the link must be dropped.

use crate::error::{LinkError, LinkResult};
use crate::state::User;
use crate::sync::merge::check_hop_count;
use crate::sync::mesh::{Mesh, Outcome, Target};
use meshirc_proto::{AnnounceServer, LinkMessage};
use std::collections::HashSet;
use tracing::info;

impl Mesh {
    /// Apply an announcement received on `link` and pass it on.
    pub fn apply_announce(&mut self, link: &str, announce: AnnounceServer) -> LinkResult<Outcome> {
        self.require_bursted(link)?;
        let topology = &self.directory.topology;

        check_hop_count(&announce.name, announce.hop_count)?;
        if topology.knows(&announce.name) {
            return Err(LinkError::AlreadyConnected(announce.name));
        }
        if topology.is_local(&announce.near_hop) || !topology.knows(&announce.near_hop) {
            return Err(LinkError::DataInconsistent(format!(
                "{} announced behind unknown server {}",
                announce.name, announce.near_hop
            )));
        }
        if !topology.is_behind(&announce.near_hop, link) {
            return Err(LinkError::DataInconsistent(format!(
                "{} announced on {} but {} is not behind it",
                announce.name, link, announce.near_hop
            )));
        }
        self.validate_records(
            &announce.name,
            &announce.linked_servers,
            &announce.users,
            &announce.channels,
            true,
        )?;

        let mut out = Outcome::default();
        self.directory.topology.add_server(
            &announce.name,
            &announce.description,
            announce.hop_count.saturating_add(1),
            &announce.near_hop,
        );
        for server in &announce.linked_servers {
            self.directory.topology.add_server(
                &server.name,
                &server.description,
                server.hop_count.saturating_add(1),
                &server.near_hop,
            );
        }

        let mut admitted = HashSet::new();
        for record in &announce.users {
            if self.directory.add_user(User::from_record(record)) {
                admitted.insert(self.directory.fold(&record.nick));
            }
        }
        let statuses = self.statuses_of(&announce.users, &admitted);
        for record in &announce.channels {
            self.merge_channel(record, &admitted, &statuses, &announce.name, &mut out);
        }

        if let Some(onward) = self.announcement(&announce.name) {
            out.relay(
                Target::AllExcept(link.to_string()),
                LinkMessage::AnnounceServer(onward),
            );
        }
        self.notify_merge(&announce.name);
        info!(
            server = %announce.name,
            via = %link,
            origin = %announce.origin,
            users = admitted.len(),
            "server joined the mesh"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::LinkError;
    use crate::state::ClientEvent;
    use crate::sync::mesh::testing::*;
    use meshirc_proto::{AnnounceServer, LinkMessage};

    /// a - b, then c links to b; returns b's merge outcome.
    fn chain() -> (ManualClock, crate::sync::mesh::Mesh, crate::sync::mesh::Mesh, crate::sync::mesh::Outcome) {
        let clock = ManualClock::new(100);
        let mut a = mesh("a.test", &clock);
        let mut b = mesh("b.test", &clock);
        let mut c = mesh("c.test", &clock);
        link(&mut a, &mut b);
        register(&mut c, "carol");
        join(&mut c, "carol", "#shared");
        let (out_b, _) = link(&mut b, &mut c);
        (clock, a, b, out_b)
    }

    fn announcement(out: &crate::sync::mesh::Outcome, to: &str) -> AnnounceServer {
        sent_to(out, to)
            .into_iter()
            .find_map(|m| match m {
                LinkMessage::AnnounceServer(a) => Some(a),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn announcement_adds_subtree_behind_link() {
        let (_clock, mut a, b, out_b) = chain();
        register(&mut a, "alice");
        join(&mut a, "alice", "#shared");

        let outs = forward(&out_b, &b, &mut a);

        let c = a.directory().topology.get("c.test").unwrap();
        assert_eq!(c.hop_count, 2);
        assert_eq!(c.near_hop, "b.test");
        assert!(a.directory().topology.is_behind("c.test", "b.test"));
        assert!(a.directory().user("carol").unwrap().is_on("c.test"));
        assert_eq!(a.directory().channel("#shared").unwrap().members.len(), 2);
        assert!(outs[0].deliveries.iter().any(|d| matches!(
            &d.event,
            ClientEvent::Join { nick, .. } if nick == "carol"
        )));
    }

    #[test]
    fn announcement_of_known_server_is_fatal() {
        let (_clock, mut a, _b, out_b) = chain();
        let ann = announcement(&out_b, "a.test");
        a.apply_announce("b.test", ann.clone()).unwrap();

        let err = a.apply_announce("b.test", ann).unwrap_err();
        assert!(matches!(err, LinkError::AlreadyConnected(ref n) if n == "c.test"));
        assert!(err.is_fatal());
    }

    #[test]
    fn announcement_with_unknown_near_hop_is_fatal() {
        let (_clock, mut a, _b, out_b) = chain();
        let mut ann = announcement(&out_b, "a.test");
        ann.near_hop = "nowhere.test".into();
        assert!(matches!(
            a.apply_announce("b.test", ann),
            Err(LinkError::DataInconsistent(_))
        ));
        assert!(!a.directory().topology.knows("c.test"));
    }

    #[test]
    fn announcement_with_colliding_user_is_fatal() {
        let (_clock, mut a, _b, out_b) = chain();
        register(&mut a, "carol");
        let ann = announcement(&out_b, "a.test");

        assert!(matches!(
            a.apply_announce("b.test", ann),
            Err(LinkError::DataInconsistent(_))
        ));
        assert!(a.directory().user("carol").unwrap().is_on("a.test"));
        assert!(!a.directory().topology.knows("c.test"));
    }

    #[test]
    fn announcement_before_burst_is_recoverable() {
        let clock = ManualClock::new(100);
        let mut a = mesh("a.test", &clock);
        a.attach_link("b.test", "").unwrap();
        let ann = AnnounceServer {
            origin: "b.test".into(),
            name: "c.test".into(),
            description: String::new(),
            hop_count: 1,
            near_hop: "b.test".into(),
            linked_servers: vec![],
            users: vec![],
            channels: vec![],
        };
        let err = a.apply_announce("b.test", ann).unwrap_err();
        assert!(matches!(err, LinkError::NotYetBursted));
        assert!(!err.is_fatal());
    }

    #[test]
    fn announcement_is_relayed_onward() {
        let (clock, mut a, b, out_b) = chain();
        let mut d = mesh("d.test", &clock);
        link(&mut a, &mut d);

        let outs = forward(&out_b, &b, &mut a);
        let onward = announcement(&outs[0], "d.test");
        assert_eq!(onward.origin, "a.test");
        assert_eq!(onward.hop_count, 2);
        assert!(sent_to(&outs[0], "b.test").is_empty());

        d.apply_announce("a.test", onward).unwrap();
        assert_eq!(d.directory().topology.get("c.test").unwrap().hop_count, 3);
        assert_eq!(d.directory().topology.next_hop("c.test").unwrap().name, "a.test");
    }

    #[test]
    fn announcement_with_overflowing_hop_count_is_fatal() {
        let (_clock, mut a, _b, out_b) = chain();
        let mut ann = announcement(&out_b, "a.test");
        ann.hop_count = u32::MAX;

        let err = a.apply_announce("b.test", ann).unwrap_err();
        assert!(matches!(err, LinkError::DataInconsistent(_)));
        assert!(!a.directory().topology.knows("c.test"));
    }
}
