//! Drives a `Node` against a simulated node that echoes heartbeats back
//! after applying commands in order.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use open_music_node::audio::equalizer::Equalizer;
use open_music_node::audio::filters::{Filter, Karaoke, Volume};
use open_music_node::node::correlation::TOKEN_FIELD;
use open_music_node::{Error, Frame, LoadResult, Node, NodeConfig, NodeEvent, SessionState};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("open_music_node=trace"))
        .with_test_writer()
        .try_init();
}

fn frames(rx: mpsc::UnboundedReceiver<Frame>) -> impl Stream<Item = Frame> {
    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|frame| (frame, rx)) })
}

/// Fake node: records every command, then echoes its heartbeat.
fn spawn_fake_node(
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    inbound: mpsc::UnboundedSender<Frame>,
) -> Arc<Mutex<Vec<Frame>>> {
    let applied = Arc::new(Mutex::new(Vec::new()));
    let log = applied.clone();
    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if frame["op"] == "ping" {
                if inbound.send(frame).is_err() {
                    break;
                }
            } else {
                log.lock().push(frame);
            }
        }
    });
    applied
}

struct Harness {
    node: Arc<Node>,
    events: mpsc::Receiver<NodeEvent>,
    inbound: mpsc::UnboundedSender<Frame>,
    applied: Arc<Mutex<Vec<Frame>>>,
}

fn harness(config: NodeConfig) -> Harness {
    init_tracing();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    let (node, events) = Node::new(&config, Arc::new(out_tx));
    let applied = spawn_fake_node(out_rx, in_tx.clone());

    let runner = node.clone();
    tokio::spawn(async move { runner.run(frames(in_rx)).await });

    Harness {
        node,
        events,
        inbound: in_tx,
        applied,
    }
}

#[tokio::test]
async fn commands_resolve_after_echo() {
    let h = harness(NodeConfig::default());
    let player = h.node.player(1234);

    let ack = player.voice_update("session", "token", "endpoint").await.unwrap().await.unwrap();
    assert_eq!(ack.op, "voiceUpdate");

    let ack = player.play().track("encoded-track").volume(100).send().await.unwrap().await.unwrap();
    assert_eq!(ack.guild_id, 1234);
    assert!(ack.echo[TOKEN_FIELD].is_string());

    let eq = Equalizer::from_preset("bass").unwrap();
    let chain: Vec<Filter> = vec![
        eq.into(),
        Karaoke::builder().build().unwrap().into(),
        Volume::new(0.5).unwrap().into(),
    ];
    player.filters(chain).await.unwrap().await.unwrap();
    player.pause().await.unwrap().await.unwrap();
    player.destroy().await.unwrap().await.unwrap();

    assert_eq!(player.state(), SessionState::Destroyed);
    assert_eq!(h.node.engine().pending_count(), 0);

    // Every command was recorded before its heartbeat was echoed.
    let applied = h.applied.lock().clone();
    let ops: Vec<&str> = applied.iter().filter_map(|f| f["op"].as_str()).collect();
    assert_eq!(ops, ["voiceUpdate", "play", "filters", "pause", "destroy"]);

    let filters = &applied[2];
    assert_eq!(filters["guildId"], "1234");
    assert_eq!(filters["volume"], json!({"volume": 0.5}));
    assert_eq!(filters["karaoke"]["filterBand"], json!(220.0));
    assert!(!filters["equalizer"]["bands"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_sessions_get_their_own_results() {
    let h = harness(NodeConfig::default());

    let mut tasks = Vec::new();
    for guild_id in 0..8u64 {
        let node = h.node.clone();
        tasks.push(tokio::spawn(async move {
            let player = node.player(guild_id);
            let ack = player.seek(guild_id * 1000).await?.await?;
            Ok::<_, Error>(ack.guild_id)
        }));
    }

    for (guild_id, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap().unwrap(), guild_id as u64);
    }
    assert_eq!(h.node.player_count(), 8);
}

#[tokio::test]
async fn node_events_reach_the_application() {
    let mut h = harness(NodeConfig::default());

    h.inbound
        .send(json!({"op": "event", "type": "TrackStartEvent", "guildId": "5", "track": "abc"}))
        .unwrap();
    h.inbound
        .send(json!({
            "op": "stats",
            "players": {"total": 1, "playing": 1},
            "runtime": {"uptime": 60000},
        }))
        .unwrap();

    match h.events.recv().await {
        Some(NodeEvent::TrackStart { guild_id, track }) => {
            assert_eq!(guild_id, 5);
            assert_eq!(track.as_deref(), Some("abc"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(h.events.recv().await, Some(NodeEvent::Stats(_))));
    assert_eq!(h.node.stats().unwrap().uptime, 60000);
}

#[tokio::test]
async fn disconnect_abandons_commands_the_node_never_answered() {
    init_tracing();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();
    let (node, mut events) = Node::new(&NodeConfig::default(), Arc::new(out_tx));

    let runner = {
        let node = node.clone();
        tokio::spawn(async move { node.run(frames(in_rx)).await })
    };

    // Nobody echoes: the commands stay pending.
    let player = node.player(77);
    let handles = vec![
        player.pause().await.unwrap(),
        player.seek(5).await.unwrap(),
        player.stop().await.unwrap(),
    ];
    assert_eq!(node.engine().pending_count(), 3);
    while out_rx.try_recv().is_ok() {}

    drop(in_tx);
    runner.await.unwrap();

    for handle in handles {
        assert!(matches!(handle.await, Err(Error::ConnectionLost)));
    }
    assert!(player.is_destroyed());
    assert!(node.get_player(77).is_none());
    assert!(matches!(player.resume().await, Err(Error::Lifecycle { guild_id: 77 })));
    assert!(out_rx.try_recv().is_err());

    assert!(matches!(
        events.recv().await,
        Some(NodeEvent::Disconnected { abandoned: 3, .. })
    ));
}

#[tokio::test]
async fn configured_timeout_applies_to_every_command() {
    init_tracing();
    let (out_tx, _out_rx) = mpsc::unbounded_channel::<Frame>();
    let config = NodeConfig {
        command_timeout: Some(Duration::from_millis(20)),
        ..Default::default()
    };
    let (node, _events) = Node::new(&config, Arc::new(out_tx));

    let result = node.player(1).stop().await.unwrap().await;
    assert!(matches!(result, Err(Error::Timeout { .. })));
    assert_eq!(node.engine().pending_count(), 0);
}

#[tokio::test]
async fn load_results_use_the_node_decoder() {
    let (out_tx, _out_rx) = mpsc::unbounded_channel::<Frame>();
    let (node, _events) = Node::new(&NodeConfig::default(), Arc::new(out_tx));

    assert_eq!(node.load_result(&json!({"loadType": "NO_MATCHES"})), LoadResult::NoMatches);
    assert_eq!(
        node.load_result(&json!({"loadType": "TRACK_LOADED", "tracks": ["not-a-track"]})),
        LoadResult::Unknown
    );
    assert!(matches!(node.decode_track("@@@"), Err(Error::TrackDecode(_))));
}
