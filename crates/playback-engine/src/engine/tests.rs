use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::*;
use crate::bus::{BusMessage, Stage};
use crate::config::SinkKind;
use crate::error::OpenError;
use crate::events::PlayerEvent;
use crate::pipeline::clock::Direction;
use crate::testutil::write_wav;

#[derive(Clone, Default)]
struct MemoryStore {
    positions: Arc<Mutex<HashMap<PathBuf, u64>>>,
}

impl PositionStore for MemoryStore {
    fn save(&self, path: &Path, ms: u64) -> anyhow::Result<()> {
        self.positions.lock().unwrap().insert(path.to_path_buf(), ms);
        Ok(())
    }

    fn load(&self, path: &Path) -> anyhow::Result<Option<u64>> {
        Ok(self.positions.lock().unwrap().get(path).copied())
    }
}

fn engine_with(store: MemoryStore) -> Engine {
    let config = EngineConfig {
        sink: SinkKind::Null,
        open_timeout_ms: 10_000,
        ..EngineConfig::default()
    };
    Engine::with_store(config, Box::new(store)).unwrap()
}

/// The path as the engine stores it.
fn engine_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap()
}

fn opened(name: &str, seconds: f64) -> (Engine, PathBuf) {
    let path = write_wav(name, seconds);
    let mut engine = engine_with(MemoryStore::default());
    engine.open(path.to_str().unwrap()).unwrap();
    (engine, path)
}

/// Relay bus messages until `EndOfStream` arrives or ten seconds pass.
fn run_to_end(engine: &mut Engine, events: &Receiver<PlayerEvent>) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        engine.dispatch_timeout(Duration::from_millis(100));
        if events.try_iter().any(|e| e == PlayerEvent::EndOfStream) {
            return true;
        }
    }
    false
}

#[test]
fn open_reports_duration_and_starts_at_zero() {
    let (engine, path) = opened("ten-minutes", 600.0);

    assert_eq!(engine.state(), EngineState::Paused);
    let duration = engine.query_duration().unwrap();
    assert!(duration.abs_diff(600_000) <= 100, "duration {duration}");
    assert_eq!(engine.query_position(), Some(0));
    assert!(engine.uri().unwrap().starts_with("file:///"));
    assert!(!engine.is_muted());

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn reopen_resumes_saved_position() {
    let path = write_wav("resume", 60.0);
    let store = MemoryStore::default();
    let mut engine = engine_with(store.clone());

    engine.open(path.to_str().unwrap()).unwrap();
    engine.seek(45_000);
    engine.close();
    assert_eq!(engine.state(), EngineState::Closed);

    engine.open(path.to_str().unwrap()).unwrap();
    assert_eq!(engine.query_position(), Some(45_000));

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn stored_position_past_the_end_is_clamped() {
    let path = write_wav("clamp-resume", 5.0);
    let store = MemoryStore::default();
    store
        .positions
        .lock()
        .unwrap()
        .insert(path.canonicalize().unwrap(), 90_000);
    let mut engine = engine_with(store);

    engine.open(path.to_str().unwrap()).unwrap();
    assert_eq!(engine.query_position(), engine.query_duration());

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn missing_file_leaves_engine_closed() {
    let mut engine = engine_with(MemoryStore::default());

    let err = engine.open("/no/such/file.ogg").unwrap_err();
    assert!(matches!(err, OpenError::ResourceNotFound(_)));
    assert_eq!(engine.state(), EngineState::Closed);

    engine.play();
    engine.seek(1_000);
    assert_eq!(engine.state(), EngineState::Closed);
    assert_eq!(engine.query_position(), None);
}

#[test]
fn undecodable_file_fails_with_pipeline_error() {
    let path = std::env::temp_dir().join(format!(
        "playback-engine-{}-garbage.wav",
        std::process::id()
    ));
    fs::write(&path, vec![0x5a; 4_096]).unwrap();
    let mut engine = engine_with(MemoryStore::default());

    let err = engine.open(path.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, OpenError::Pipeline(_)), "{err:?}");
    assert_eq!(engine.state(), EngineState::Closed);

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn runtime_error_closes_engine_once() {
    let (mut engine, path) = opened("runtime-error", 10.0);
    let events = engine.subscribe();
    engine.play();
    assert_eq!(engine.state(), EngineState::Playing);

    engine
        .pipeline
        .bus_sender()
        .error(Stage::Decoder, "corrupt stream");
    engine.dispatch_pending();

    let errors: Vec<_> = events
        .try_iter()
        .filter(|e| matches!(e, PlayerEvent::Error(_)))
        .collect();
    assert_eq!(errors, vec![PlayerEvent::Error("decoder: corrupt stream".to_string())]);
    assert_eq!(engine.state(), EngineState::Closed);
    assert_eq!(engine.query_position(), None);

    engine.play();
    assert_eq!(engine.state(), EngineState::Closed);

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn end_of_stream_leaves_engine_paused_at_the_end() {
    let (mut engine, path) = opened("short", 1.0);
    let events = engine.subscribe();
    engine.play();

    assert!(run_to_end(&mut engine, &events));
    assert_eq!(engine.state(), EngineState::Paused);
    assert_eq!(engine.query_position(), Some(1_000));

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn playing_after_end_of_stream_ends_again() {
    let (mut engine, path) = opened("replay", 1.0);
    let events = engine.subscribe();
    engine.play();
    assert!(run_to_end(&mut engine, &events));

    engine.play();
    assert_eq!(engine.state(), EngineState::Playing);
    assert!(run_to_end(&mut engine, &events));
    assert_eq!(engine.state(), EngineState::Paused);
    assert_eq!(engine.query_position(), Some(1_000));

    // A seek back makes the file playable again.
    engine.seek(500);
    engine.play();
    assert!(run_to_end(&mut engine, &events));

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn fast_playback_stops_exactly_on_selection_end() {
    let (mut engine, path) = opened("fast-selection", 20.0);
    let events = engine.subscribe();
    engine.set_selection(2_000, 4_000);
    engine.set_speed(2.0);
    engine.play();

    assert!(run_to_end(&mut engine, &events));
    assert_eq!(engine.query_position(), Some(4_000));
    assert_eq!(engine.speed(), 2.0);

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn fast_forward_runs_to_the_end_and_keeps_the_speed() {
    let (mut engine, path) = opened("fast-forward", 20.0);
    let events = engine.subscribe();
    engine.seek(18_000);

    engine.fast_forward(0.0);
    engine.fast_forward(-2.0);
    assert_eq!(engine.state(), EngineState::Paused);

    engine.fast_forward(2.0);
    assert_eq!(engine.state(), EngineState::Playing);
    assert!(run_to_end(&mut engine, &events));
    assert_eq!(engine.query_position(), Some(20_000));
    assert_eq!(engine.speed(), 1.0);

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn rewind_plays_back_to_the_selection_start() {
    let (mut engine, path) = opened("reverse", 20.0);
    let events = engine.subscribe();
    engine.set_selection(5_000, 15_000);
    engine.seek(6_000);

    engine.rewind(0.0);
    engine.rewind(f64::NAN);
    assert_eq!(engine.state(), EngineState::Paused);

    engine.rewind(2.0);
    assert_eq!(engine.state(), EngineState::Playing);
    assert_eq!(engine.pipeline.direction(), Direction::Reverse);
    assert!(run_to_end(&mut engine, &events));
    assert_eq!(engine.state(), EngineState::Paused);
    assert_eq!(engine.query_position(), Some(5_000));

    // Playback after a rewind runs forwards again.
    assert_eq!(engine.pipeline.direction(), Direction::Forward);

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn opening_another_file_saves_the_first_position() {
    let first = write_wav("first", 60.0);
    let second = write_wav("second", 5.0);
    let store = MemoryStore::default();
    let mut engine = engine_with(store.clone());

    engine.open(first.to_str().unwrap()).unwrap();
    engine.seek(30_000);
    engine.open(second.to_str().unwrap()).unwrap();

    let saved = store.positions.lock().unwrap().clone();
    assert_eq!(saved.get(engine_path(&first).as_path()), Some(&30_000));
    assert_eq!(engine.path(), Some(engine_path(&second).as_path()));

    drop(engine);
    let _ = fs::remove_file(first);
    let _ = fs::remove_file(second);
}

#[test]
fn dropping_the_engine_saves_the_position() {
    let path = write_wav("drop", 20.0);
    let store = MemoryStore::default();
    let mut engine = engine_with(store.clone());
    engine.open(path.to_str().unwrap()).unwrap();
    engine.seek(12_000);

    drop(engine);
    let saved = store.positions.lock().unwrap().get(&engine_path(&path)).copied();
    assert_eq!(saved, Some(12_000));
    let _ = fs::remove_file(path);
}

#[test]
fn runtime_duration_changes_reach_subscribers() {
    let (mut engine, path) = opened("duration-change", 10.0);
    let events = engine.subscribe();
    // Let the resumed session's decoder publish the declared length first.
    std::thread::sleep(Duration::from_millis(200));
    engine.dispatch_pending();

    for ms in [12_000, 9_000] {
        engine.pipeline.duration_cell().set_exact(ms);
        engine.pipeline.bus_sender().post(BusMessage::DurationChanged);
        engine.dispatch_pending();
        assert_eq!(engine.query_duration(), Some(ms));
    }
    // An unchanged value is not announced again.
    engine.pipeline.bus_sender().post(BusMessage::DurationChanged);
    engine.dispatch_pending();

    let changes: Vec<_> = events.try_iter().collect();
    assert_eq!(
        changes,
        vec![
            PlayerEvent::DurationChanged(12_000),
            PlayerEvent::DurationChanged(9_000),
        ]
    );

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn end_of_stream_before_a_duration_fails_the_open() {
    let path = write_wav("empty", 0.0);
    let mut engine = engine_with(MemoryStore::default());

    let err = engine.open(path.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, OpenError::Pipeline(_)), "{err:?}");
    assert_eq!(engine.state(), EngineState::Closed);
    assert_eq!(engine.uri(), None);

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn unresolvable_locator_keeps_the_previous_source() {
    let (mut engine, path) = opened("kept-open", 5.0);
    let uri = engine.uri().map(str::to_string);
    engine.seek(2_000);

    let err = engine.open("/no/such/file.ogg").unwrap_err();
    assert!(matches!(err, OpenError::ResourceNotFound(_)));
    assert_eq!(engine.state(), EngineState::Paused);
    assert_eq!(engine.uri().map(str::to_string), uri);
    assert_eq!(engine.query_position(), Some(2_000));

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn seek_outside_duration_is_ignored() {
    let (mut engine, path) = opened("seek-range", 20.0);

    engine.seek(5_000);
    assert_eq!(engine.query_position(), Some(5_000));

    engine.seek(-1);
    engine.seek(25_000);
    assert_eq!(engine.query_position(), Some(5_000));

    engine.seek(20_000);
    assert_eq!(engine.query_position(), Some(20_000));

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn relative_seek_clamps_to_bounds() {
    let (mut engine, path) = opened("relative", 20.0);

    engine.seek(3_000);
    engine.seek_relative(-10_000);
    assert_eq!(engine.query_position(), Some(0));

    engine.seek_relative(60_000);
    assert_eq!(engine.query_position(), engine.query_duration());

    engine.seek_relative(-2_500);
    assert_eq!(engine.query_position(), Some(17_500));

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn fraction_seek_covers_whole_file() {
    let (mut engine, path) = opened("fraction", 20.0);

    engine.seek_fraction(500);
    assert_eq!(engine.query_position(), Some(10_000));
    assert_eq!(engine.permille(), Some(500));

    engine.seek_fraction(1_001);
    assert_eq!(engine.query_position(), Some(10_000));

    engine.seek_fraction(1_000);
    assert_eq!(engine.query_position(), engine.query_duration());

    engine.seek_fraction(0);
    assert_eq!(engine.query_position(), Some(0));

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn speed_change_keeps_position() {
    let (mut engine, path) = opened("speed", 30.0);

    engine.seek(12_345);
    for speed in [0.1, 0.5, 1.5, 2.0] {
        engine.set_speed(speed);
        assert_eq!(engine.speed(), speed);
        assert_eq!(engine.query_position(), Some(12_345));
    }

    engine.set_speed(4.0);
    assert_eq!(engine.speed(), 2.0);
    engine.set_speed(-1.0);
    engine.set_speed(f64::NAN);
    assert_eq!(engine.speed(), 2.0);

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn mute_does_not_touch_volume() {
    let mut engine = engine_with(MemoryStore::default());

    engine.set_volume(0.4);
    engine.set_mute(true);
    assert_eq!(engine.volume(), 0.4);
    assert!(engine.is_muted());

    engine.set_volume(1.5);
    engine.set_volume(-0.1);
    assert_eq!(engine.volume(), 0.4);

    engine.set_mute(false);
    assert!(!engine.is_muted());
    assert_eq!(engine.volume(), 0.4);
}

#[test]
fn selection_bounds_seeks() {
    let (mut engine, path) = opened("selection", 20.0);

    engine.set_selection(2_000, 5_000);
    assert_eq!(engine.selection(), Some((2_000, 5_000)));
    assert_eq!(engine.query_position(), Some(2_000));

    engine.seek(6_000);
    assert_eq!(engine.query_position(), Some(2_000));
    engine.seek_relative(10_000);
    assert_eq!(engine.query_position(), Some(5_000));

    engine.set_selection(4_000, 4_000);
    assert_eq!(engine.selection(), Some((2_000, 5_000)));

    engine.clear_selection();
    assert_eq!(engine.selection(), None);
    engine.seek(6_000);
    assert_eq!(engine.query_position(), Some(6_000));

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn pause_and_rewind_jumps_back() {
    let path = write_wav("rewind", 20.0);
    let config = EngineConfig {
        sink: SinkKind::Null,
        rewind_on_pause_ms: 3_000,
        ..EngineConfig::default()
    };
    let mut engine = Engine::with_store(config, Box::new(MemoryStore::default())).unwrap();
    engine.open(path.to_str().unwrap()).unwrap();

    engine.seek(10_000);
    engine.pause_and_rewind();
    assert_eq!(engine.state(), EngineState::Paused);
    assert_eq!(engine.query_position(), Some(7_000));

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn timestamps_follow_configured_format() {
    let (mut engine, path) = opened("timestamp", 20.0);

    engine.seek(7_250);
    assert_eq!(engine.timestamp().as_deref(), Some("#0:07.2#"));
    assert_eq!(engine.current_time_string(1).as_deref(), Some("00:07.2"));
    assert_eq!(engine.duration_time_string(0).as_deref(), Some("00:20"));

    assert!(engine.goto_timestamp("#0:15.0#"));
    assert_eq!(engine.query_position(), Some(15_000));
    assert!(!engine.goto_timestamp("#0:45.0#"));
    assert!(engine.string_is_timestamp("#0:45.0#", false));
    assert_eq!(engine.query_position(), Some(15_000));

    drop(engine);
    let _ = fs::remove_file(path);
}

#[test]
fn status_snapshot_tracks_engine() {
    let mut engine = engine_with(MemoryStore::default());
    let closed = engine.status();
    assert_eq!(closed.state, EngineState::Closed);
    assert_eq!(closed.position_ms, None);

    let path = write_wav("status", 5.0);
    engine.open(path.to_str().unwrap()).unwrap();
    let status = engine.status();
    assert_eq!(status.state, EngineState::Paused);
    assert_eq!(status.position_ms, Some(0));
    assert_eq!(status.uri.as_deref(), engine.uri());
    assert_eq!(engine.filename().unwrap(), path.file_name().unwrap().to_string_lossy());

    drop(engine);
    let _ = fs::remove_file(path);
}
