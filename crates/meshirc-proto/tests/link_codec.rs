//! LinkCodec over a real async stream.

use futures_util::{SinkExt, StreamExt};
use meshirc_proto::{
    AnnounceServer, Burst, ChannelRecord, LinkCodec, LinkMessage, Membership, ModeToken,
    ServerRecord, UserRecord,
};
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{Framed, FramedRead};

fn user(nick: &str, server: &str) -> UserRecord {
    UserRecord {
        nick: nick.to_string(),
        username: nick.to_string(),
        hostname: "example.org".to_string(),
        realname: format!("{nick} test user"),
        ip: "198.51.100.7".to_string(),
        server: server.to_string(),
        secure: false,
        modes: vec![],
        channels: vec![Membership::new("#test", "o")],
        signon: 100,
        nick_time: 100,
    }
}

#[tokio::test]
async fn burst_and_announce_cross_the_wire() {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let mut tx = Framed::new(a, LinkCodec::new());
    let mut rx = Framed::new(b, LinkCodec::new());

    let burst = Burst {
        servers: vec![ServerRecord {
            name: "c.example.net".into(),
            description: "Leaf".into(),
            hop_count: 1,
            near_hop: "a.example.net".into(),
            reachable: vec![],
        }],
        users: vec![user("alice", "a.example.net")],
        channels: vec![ChannelRecord {
            name: "#test".into(),
            topic: "welcome to #test".into(),
            topic_setter: "alice".into(),
            topic_time: 150,
            modes: vec![ModeToken::flag('t')],
            members: vec!["alice".into()],
            created: 100,
        }],
    };
    let announce = AnnounceServer {
        origin: "a.example.net".into(),
        name: "d.example.net".into(),
        description: "Another leaf".into(),
        hop_count: 1,
        near_hop: "a.example.net".into(),
        linked_servers: vec![],
        users: vec![user("dave", "d.example.net")],
        channels: vec![],
    };

    tx.send(LinkMessage::Burst(burst.clone())).await.unwrap();
    tx.send(LinkMessage::AnnounceServer(announce.clone()))
        .await
        .unwrap();
    tx.send(LinkMessage::Ping("42".into())).await.unwrap();

    assert_eq!(rx.next().await.unwrap().unwrap(), LinkMessage::Burst(burst));
    assert_eq!(
        rx.next().await.unwrap().unwrap(),
        LinkMessage::AnnounceServer(announce)
    );
    assert_eq!(
        rx.next().await.unwrap().unwrap(),
        LinkMessage::Ping("42".into())
    );
}

#[tokio::test]
async fn truncated_burst_yields_nothing() {
    let (mut a, b) = tokio::io::duplex(4096);
    let mut rx = FramedRead::new(b, LinkCodec::new());

    a.write_all(b"PING 1\r\nBURST\r\nSERVER c.example.net 1 a.example.net * :C\r\n")
        .await
        .unwrap();
    drop(a);

    assert_eq!(
        rx.next().await.unwrap().unwrap(),
        LinkMessage::Ping("1".into())
    );
    assert!(rx.next().await.is_none());
}
