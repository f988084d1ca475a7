//! End-to-end session tests over the in-process channel transport

#[cfg(test)]
mod tests {
    use mc_session::{
        Account, ChannelConnector, ClientPacket, ConnectionState, GameProfile, RemoteEnd,
        ServerEndpoint, ServerPacket, Session, SessionConfig, SessionEvent, SessionInfo,
        TransportEvent, Vec3,
    };
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use uuid::Uuid;

    fn start() -> (Session, RemoteEnd) {
        let (connector, remotes) = ChannelConnector::new();
        let info = SessionInfo {
            server: ServerEndpoint::new("localhost", 25565),
            account: Account {
                username: "alex".into(),
                access_token: "t".into(),
            },
        };
        let config = SessionConfig {
            tick_interval_ms: 10,
            ..Default::default()
        };
        let session = Session::new(info, config, Arc::new(connector)).unwrap();
        session.connect(GameProfile::new(Uuid::from_u128(2), "alex"), Uuid::nil());
        let remote = remotes.try_recv().unwrap();
        (session, remote)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("condition not reached within 2s");
    }

    #[test]
    fn full_session_over_channel_transport() {
        let (session, remote) = start();
        let subscription = session.subscribe(256, true);
        assert_eq!(remote.credentials.profile.name, "alex");

        remote.connected("127.0.0.1:25565");
        wait_for(|| session.state() == ConnectionState::Connected);

        remote.packet(ServerPacket::JoinGame { entity_id: 11 });
        remote.packet(ServerPacket::SpawnPlayer {
            entity_id: 11,
            uuid: Uuid::from_u128(11),
            position: Vec3::new(0.0, 70.0, 0.0),
            rotation: Default::default(),
        });
        remote.packet(ServerPacket::PlayerPositionRotation {
            x: 0.0,
            y: 70.0,
            z: 0.0,
            yaw: 0.0,
            pitch: 0.0,
        });
        wait_for(|| session.player().is_some());

        // Ticks arrive while connected.
        wait_for(|| {
            subscription
                .receiver()
                .try_iter()
                .any(|e| e == SessionEvent::Tick)
        });

        remote.disconnected("Server closed");
        wait_for(|| session.state() == ConnectionState::Disconnected);
        assert!(session.entities().is_empty());
        assert!(session.player().is_none());
    }

    #[test]
    fn echo_reaches_the_remote_end() {
        let (session, remote) = start();
        remote.connected("peer");
        remote.packet(ServerPacket::PlayerPositionRotation {
            x: 4.0,
            y: 5.0,
            z: 6.0,
            yaw: 1.0,
            pitch: 2.0,
        });

        let mut sent = Vec::new();
        wait_for(|| {
            sent.extend(remote.sent());
            !sent.is_empty()
        });
        assert_eq!(
            sent,
            vec![ClientPacket::PlayerPositionRotation {
                on_ground: false,
                x: 4.0,
                y: 5.0,
                z: 6.0,
                yaw: 1.0,
                pitch: 2.0,
            }]
        );
        session.disconnect();
    }

    #[test]
    fn user_disconnect_closes_the_channel_transport() {
        let (session, remote) = start();
        remote.connected("peer");
        wait_for(|| session.state() == ConnectionState::Connected);

        session.disconnect();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(!session.is_active());
        // Late traffic from the closed transport has nowhere to go.
        remote.packet(ServerPacket::JoinGame { entity_id: 1 });
        thread::sleep(Duration::from_millis(20));
        assert!(session.player().is_none());
    }

    #[test]
    fn script_lines_parse_as_transport_events() {
        let script = r#"
{"type":"connected","remote_address":"127.0.0.1:25565"}
{"type":"packet","packet":{"kind":"join_game","entity_id":7}}
{"type":"packet","packet":{"kind":"chat","message":{"text":"hi"}}}
{"type":"disconnected","reason":"bye"}
"#;
        let events: Vec<TransportEvent> = script
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[1],
            TransportEvent::Packet {
                packet: ServerPacket::JoinGame { entity_id: 7 }
            }
        );
    }
}
