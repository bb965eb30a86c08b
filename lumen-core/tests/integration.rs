//! Integration tests: the capture → pacing → session → wire pipeline and
//! the feedback loop back into the predictor, over a real TCP connection
//! on localhost.

use std::time::Duration;

use bytes::Bytes;
use lumen_core::predictor::TrackerEvent;
use lumen_core::{
    Connection, ConnectionInfo, ControlMessage, FrameFlags, FramePacingQueue, FramePacket,
    FramePayload, MessageType, NetworkPredictor, PacedRead, PacingConfig, PredictorConfig,
    Resolution, StreamConfig, StreamSession, VideoFormat, WireMessage, ZstdEncoder,
};
use tokio::net::TcpListener;

// ── Helpers ──────────────────────────────────────────────────────

async fn connected_pair() -> (Connection, Connection) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let info = ConnectionInfo::new(addr.ip().to_string(), addr.port());
    let client = tokio::spawn(async move { Connection::connect(&info).await.unwrap() });
    let (stream, _) = listener.accept().await.unwrap();
    (Connection::new(stream), client.await.unwrap())
}

fn small_stream() -> StreamConfig {
    StreamConfig {
        resolution: Resolution::new(64, 32),
        min_resolution: Resolution::new(16, 16),
        max_resolution: Resolution::new(128, 64),
        default_resolution: Resolution::new(64, 32),
        format: VideoFormat::Bgra,
        gop_size: 4,
        ..StreamConfig::default()
    }
}

fn frame(seq: u64, res: Resolution) -> FramePacket {
    let len = VideoFormat::Bgra.frame_len(res);
    FramePacket::new(seq, res, VideoFormat::Bgra, Bytes::from(vec![(seq % 251) as u8; len]))
}

// ── Predictor scenarios ──────────────────────────────────────────

#[test]
fn steady_feedback_reaches_expected_target() {
    let mut predictor = NetworkPredictor::new(PredictorConfig {
        target_delay_ms: 60.0,
        ..PredictorConfig::default()
    });
    for _ in 0..30 {
        predictor.update(0, 50_000, 20.0);
    }
    let model = predictor.model();
    assert!((model.reverse_bandwidth - 0.4).abs() < 1e-6);
    assert!((predictor.target_kb() - 135.0).abs() < 0.5);
}

#[test]
fn oscillating_link_recovers_after_quiet_period() {
    let config = PredictorConfig {
        frame_rate: 10.0,
        timeout_secs: 2.0,
        time_to_explore_secs: 3.0,
        ..PredictorConfig::default()
    };
    let mut predictor = NetworkPredictor::new(config);
    let spike = |p: &mut NetworkPredictor| {
        for _ in 0..5 {
            p.update(0, 80_000, 180.0);
        }
        p.update(0, 20_000, 1.0);
    };

    spike(&mut predictor);
    spike(&mut predictor);
    assert!(predictor.tracker().new_state());
    assert!(predictor.tracker().size_cap().is_some());

    // 3 s to explore, then 2 s of clean recovery at 10 fps.
    for _ in 0..50 {
        predictor.update(0, 20_000, 1.0);
    }
    let tracker = predictor.tracker();
    assert!(!tracker.new_state());
    assert!(!tracker.recovery_attempt());
    assert_eq!(tracker.spikes(), 0);
    assert_eq!(tracker.estimated_threshold_size(), 0.0);
}

#[test]
fn spike_end_reports_event() {
    let mut tracker = lumen_core::predictor::SteadyStateTracker::new(&PredictorConfig::default());
    for _ in 0..5 {
        tracker.observe(70.0, 180.0);
    }
    assert_eq!(tracker.observe(30.0, 0.0), TrackerEvent::SpikeEnded);
    assert_eq!(tracker.estimated_threshold_size(), 70.0);
}

// ── Pipeline ─────────────────────────────────────────────────────

#[tokio::test]
async fn frames_flow_from_queue_to_client() {
    let (host, mut client) = connected_pair().await;
    let (sender, mut reader, pacing) = FramePacingQueue::new(PacingConfig {
        render_fps_enc: true,
        ..PacingConfig::default()
    })
    .split();
    let mut session = StreamSession::new(small_stream(), ZstdEncoder::new(), PredictorConfig::default())
        .with_pacing(pacing);
    session.start().await.unwrap();

    let res = session.config().resolution;
    for seq in 0..5 {
        sender.send_frame(frame(seq, res)).unwrap();
        let packet = match reader.read_frame().await {
            PacedRead::Frame(p) => p,
            other => panic!("expected frame, got {other:?}"),
        };
        let encoded = session.encode_frame(&packet).await.unwrap().unwrap();
        host.send(encoded.into_payload().unwrap().into_message().unwrap())
            .await
            .unwrap();
    }

    let mut keys = Vec::new();
    for expected in 1..=5u64 {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.message_type().unwrap(), MessageType::Frame);
        assert_eq!(msg.value() as u64, expected);
        let payload = FramePayload::from_message(&msg).unwrap();
        assert_eq!((payload.info.width, payload.info.height), (64, 32));
        let raw = zstd::decode_all(payload.video()).unwrap();
        assert_eq!(raw.len(), VideoFormat::Bgra.frame_len(res));
        keys.push(payload.info.flags.contains(FrameFlags::KEY));
    }
    assert_eq!(keys, vec![true, false, false, false, true]);
}

#[tokio::test]
async fn feedback_over_the_wire_retargets_encoder() {
    let (mut host, client) = connected_pair().await;
    let mut session = StreamSession::new(small_stream(), ZstdEncoder::new(), PredictorConfig::default());
    session.start().await.unwrap();

    for _ in 0..30 {
        client
            .send(ControlMessage::feedback(20.0, 50_000).into_message().unwrap())
            .await
            .unwrap();
    }
    for _ in 0..30 {
        let msg = host.recv().await.unwrap();
        let control = ControlMessage::from_message(&msg).unwrap();
        session.handle_control(control).await.unwrap();
    }

    let expected = session.predictor().next_frame_size();
    assert_eq!(session.encoder().target_frame_size(), Some(expected.min(1_000_000)));
    assert_eq!(session.stats().feedback_samples, 30);
}

#[tokio::test]
async fn out_of_range_resolution_request_substitutes_default() {
    let mut session = StreamSession::new(
        StreamConfig {
            max_resolution: Resolution::new(1280, 720),
            default_resolution: Resolution::new(1280, 720),
            resolution: Resolution::new(640, 480),
            min_resolution: Resolution::new(320, 240),
            ..StreamConfig::default()
        },
        ZstdEncoder::new(),
        PredictorConfig::default(),
    );
    session.start().await.unwrap();
    session
        .handle_control(ControlMessage::resolution(1920, 1080))
        .await
        .unwrap();
    assert_eq!(session.config().resolution, Resolution::new(1280, 720));
    assert!(session.encoder().is_running());
}

#[tokio::test]
async fn corrupt_bytes_between_messages_are_skipped() {
    use tokio::io::AsyncWriteExt;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let writer = tokio::spawn(async move {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let good = ControlMessage::KeyFrame.into_message().unwrap();
        stream.write_all(&good.to_bytes()).await.unwrap();
        stream.write_all(&[0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]).await.unwrap();
        // Oversized control payload: header announces 64 KiB.
        let mut oversized = Vec::new();
        oversized.extend_from_slice(b"LMN0");
        oversized.extend_from_slice(&(MessageType::Control as u32).to_le_bytes());
        oversized.extend_from_slice(&(64 * 1024u32).to_le_bytes());
        oversized.extend_from_slice(&1u32.to_le_bytes());
        oversized.extend_from_slice(&vec![0u8; 64 * 1024]);
        stream.write_all(&oversized).await.unwrap();
        let tail = WireMessage::signal(MessageType::HeadAck, 1);
        stream.write_all(&tail.to_bytes()).await.unwrap();
        stream
    });

    let (stream, _) = listener.accept().await.unwrap();
    let mut conn = Connection::new(stream);
    let first = conn.recv().await.unwrap();
    assert_eq!(
        ControlMessage::from_message(&first).unwrap(),
        ControlMessage::KeyFrame
    );
    let second = conn.recv().await.unwrap();
    assert_eq!(second.message_type().unwrap(), MessageType::HeadAck);
    drop(writer.await.unwrap());
}
