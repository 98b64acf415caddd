//! Telemetry uplink and the uplink worker against a scripted server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use coldmonitor::adapters::nvs::NvsAdapter;
use coldmonitor::app::context::SharedSettings;
use coldmonitor::app::status::SharedStatus;
use coldmonitor::buffer::ReadingBuffer;
use coldmonitor::config::{DeviceSettings, FIRMWARE_VERSION, SystemConfig};
use coldmonitor::door::{DoorEvent, DoorEventQueue};
use coldmonitor::error::{Error, TransportError};
use coldmonitor::tasks::{SharedReadingBuffer, UplinkWorker};
use coldmonitor::transport::Method;
use coldmonitor::uplink::{ApiClient, HEARTBEAT_FAILED_TEXT, OFFLINE_TEXT, TelemetryUplink};

use crate::mock_hw::{
    FakeClock, HttpScript, MockHttp, MockLink, MockNetwork, RecordedCall, api, gate, reply,
};

const MAC: &str = "24:6F:28:A1:B2:C3";
const DOOR_URL: &str = "https://api.example.com/readings/devices/CM-0001/door-events";
const READINGS_URL: &str = "https://api.example.com/readings/devices/CM-0001/readings";

struct Rig {
    clock: Arc<FakeClock>,
    link: Arc<MockLink>,
    script: HttpScript,
    status: SharedStatus,
    queue: Arc<DoorEventQueue>,
    buffer: SharedReadingBuffer<NvsAdapter>,
    settings: SharedSettings,
}

impl Rig {
    fn new() -> Self {
        Self {
            clock: FakeClock::new(),
            link: MockLink::online(),
            script: HttpScript::new(),
            status: SharedStatus::new(),
            queue: Arc::new(DoorEventQueue::new()),
            buffer: Arc::new(Mutex::new(ReadingBuffer::new(NvsAdapter::new().unwrap()))),
            settings: SharedSettings::new(),
        }
    }

    fn uplink(&self) -> TelemetryUplink<MockHttp> {
        let client = ApiClient::new(
            gate(&self.script, self.clock.clone()),
            self.link.clone(),
            api(),
            "CM-0001",
        );
        TelemetryUplink::new(client, MAC, FIRMWARE_VERSION, self.status.clone())
    }

    fn worker(&self, network: MockNetwork) -> UplinkWorker<MockHttp, NvsAdapter, MockNetwork> {
        UplinkWorker::new(
            self.uplink(),
            network,
            self.queue.clone(),
            self.buffer.clone(),
            self.settings.clone(),
            &SystemConfig::default(),
        )
    }

    fn network(&self) -> MockNetwork {
        MockNetwork::new(self.link.clone()).remembering()
    }

    fn buffer_readings(&self, n: usize) {
        let mut buffer = self.buffer.lock().unwrap();
        for i in 0..n {
            assert!(buffer.add(&format!("{{\"n\":{i}}}")));
        }
    }
}

fn event(seq: u32) -> DoorEvent {
    DoorEvent {
        is_open: seq % 2 == 1,
        timestamp_ms: 1_700_000_000_000 + u64::from(seq) * 1_000,
        seq,
        rssi: -61,
        uptime_ms: u64::from(seq) * 1_000,
    }
}

fn is_batch(call: &RecordedCall) -> bool {
    call.body_json().get("events").is_some()
}

fn seq_of(call: &RecordedCall) -> u64 {
    call.body_json()["seq"].as_u64().unwrap_or(0)
}

// ── Door events ───────────────────────────────────────────────

#[test]
fn batch_server_error_falls_back_to_single_uploads() {
    let rig = Rig::new();
    rig.script.respond(|call| {
        if is_batch(call) {
            Ok(reply(503, ""))
        } else if seq_of(call) <= 3 {
            Ok(reply(201, "{}"))
        } else {
            Ok(reply(500, ""))
        }
    });
    let events: Vec<DoorEvent> = (1..=5).map(event).collect();

    assert_eq!(rig.uplink().upload_door_events_batch(&events), Ok(3));

    let calls = rig.script.calls();
    assert_eq!(calls.len(), 6);
    assert!(calls.iter().all(|c| c.url == DOOR_URL && c.method == Method::Post));
    assert_eq!(calls[0].body_json()["device_id"], "CM-0001");
    assert_eq!(calls[0].body_json()["events"].as_array().map(Vec::len), Some(5));
    let singles: Vec<u64> = calls[1..].iter().map(seq_of).collect();
    assert_eq!(singles, vec![1, 2, 3, 4, 5]);
    assert_eq!(calls[1].body_json()["state"], "OPEN");
    assert_eq!(calls[2].body_json()["state"], "CLOSED");
}

#[test]
fn batch_fallback_without_any_success_is_an_error() {
    let rig = Rig::new();
    rig.script.respond(|_| Ok(reply(503, "")));

    let result = rig.uplink().upload_door_events_batch(&[event(1), event(2)]);

    assert_eq!(result, Err(Error::Transport(TransportError::ServerError(503))));
    assert_eq!(rig.script.calls().len(), 3);
}

#[test]
fn batch_client_error_is_not_retried_singly() {
    let rig = Rig::new();
    rig.script.respond(|_| Ok(reply(400, "")));

    let result = rig.uplink().upload_door_events_batch(&[event(1), event(2), event(3)]);

    assert_eq!(result, Err(Error::Transport(TransportError::UnexpectedStatus(400))));
    assert_eq!(rig.script.calls().len(), 1);
}

#[test]
fn empty_batch_sends_nothing() {
    let rig = Rig::new();
    assert_eq!(rig.uplink().upload_door_events_batch(&[]), Ok(0));
    assert!(rig.script.calls().is_empty());
}

#[test]
fn offline_calls_fail_fast_without_transport() {
    let rig = Rig::new();
    rig.link.set_connected(false);
    let uplink = rig.uplink();

    assert_eq!(uplink.upload_reading("{}"), Err(Error::Connectivity));
    assert_eq!(uplink.upload_door_event(&event(1)), Err(Error::Connectivity));
    assert_eq!(uplink.heartbeat(0, ""), Err(Error::Connectivity));
    assert_eq!(uplink.fetch_settings(), Err(Error::Connectivity));

    assert!(rig.script.calls().is_empty());
    let status = rig.status.snapshot();
    assert!(!status.connected_to_wifi);
    assert!(!status.connected_to_api);
    assert_eq!(status.last_error.as_str(), OFFLINE_TEXT);
}

#[test]
fn door_queue_drains_in_order_through_worker() {
    let rig = Rig::new();
    let mut worker = rig.worker(rig.network());
    for seq in 1..=2 {
        rig.queue.try_push(event(seq)).unwrap();
    }

    let report = worker.tick(0);
    assert_eq!(report.door.delivered, 2);
    assert!(!report.door.blocked);

    for seq in 3..=6 {
        rig.queue.try_push(event(seq)).unwrap();
    }
    let report = worker.tick(1_000);
    assert_eq!(report.door.delivered, 4);
    assert!(rig.queue.is_empty());

    let door_calls = rig.script.calls_to("/door-events");
    // two singles, then one batch of four
    assert_eq!(door_calls.len(), 3);
    assert_eq!(seq_of(&door_calls[0]), 1);
    assert_eq!(seq_of(&door_calls[1]), 2);
    let batch: Vec<u64> = door_calls[2].body_json()["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["seq"].as_u64().unwrap())
        .collect();
    assert_eq!(batch, vec![3, 4, 5, 6]);
}

#[test]
fn failed_batch_is_resent_whole_on_next_tick() {
    let rig = Rig::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    rig.script.respond(move |call| {
        if is_batch(call) && seen.fetch_add(1, Ordering::SeqCst) == 0 {
            // a 4xx does not trigger the single-event fallback
            Ok(reply(429, ""))
        } else {
            Ok(reply(200, "{}"))
        }
    });
    let mut worker = rig.worker(rig.network());
    for seq in 1..=4 {
        rig.queue.try_push(event(seq)).unwrap();
    }

    let report = worker.tick(0);
    assert_eq!(report.door.delivered, 0);
    assert!(report.door.blocked);
    assert!(worker.delivery().holds_batch());
    assert!(rig.queue.is_empty());

    rig.queue.try_push(event(5)).unwrap();
    let report = worker.tick(1_000);
    assert_eq!(report.door.delivered, 5);
    assert!(!worker.delivery().holds_batch());

    let batches: Vec<Vec<u64>> = rig
        .script
        .calls_to("/door-events")
        .iter()
        .map(|c| {
            c.body_json()["events"]
                .as_array()
                .map(|a| a.iter().map(|e| e["seq"].as_u64().unwrap()).collect())
                .unwrap_or_else(|| vec![seq_of(c)])
        })
        .collect();
    assert_eq!(batches, vec![vec![1, 2, 3, 4], vec![1, 2, 3, 4], vec![5]]);
}

// ── Heartbeat ─────────────────────────────────────────────────

#[test]
fn heartbeat_backs_off_and_recovers() {
    let rig = Rig::new();
    rig.script.respond(|call| {
        if call.url.ends_with("/devices/heartbeat") {
            Ok(reply(500, ""))
        } else {
            Ok(reply(200, r#"{"min_temp":-25.0,"max_temp":-15.0}"#))
        }
    });
    let mut worker = rig.worker(rig.network());

    assert_eq!(worker.tick(0).heartbeat_ok, Some(false));
    assert_eq!(worker.heartbeat_schedule().interval_ms(), 20_000);
    assert_eq!(worker.tick(10_000).heartbeat_ok, None);
    assert_eq!(worker.tick(20_000).heartbeat_ok, Some(false));
    assert_eq!(worker.tick(60_000).heartbeat_ok, Some(false));
    assert_eq!(worker.heartbeat_schedule().interval_ms(), 80_000);
    assert_eq!(worker.tick(100_000).heartbeat_ok, None);
    assert_eq!(rig.status.snapshot().last_error.as_str(), HEARTBEAT_FAILED_TEXT);

    rig.script.respond(|_| Ok(reply(200, "{}")));
    assert_eq!(worker.tick(140_000).heartbeat_ok, Some(true));
    assert_eq!(worker.heartbeat_schedule().interval_ms(), 10_000);
    let status = rig.status.snapshot();
    assert!(status.connected_to_api);
    assert!(status.last_error.is_empty());

    assert_eq!(rig.script.calls_to("/devices/heartbeat").len(), 4);
}

#[test]
fn heartbeat_reports_link_details() {
    let rig = Rig::new();
    rig.clock.set(125_000);

    rig.uplink().heartbeat(-61, "10.0.0.42").unwrap();

    let calls = rig.script.calls_to("/devices/heartbeat");
    let body = calls[0].body_json();
    assert_eq!(body["deviceId"], MAC);
    assert_eq!(body["firmwareVersion"], FIRMWARE_VERSION);
    assert_eq!(body["rssi"], -61);
    assert_eq!(body["uptime"], 125);
    assert_eq!(rig.status.snapshot().last_heartbeat_ms, Some(125_000));
}

// ── Readings backlog ──────────────────────────────────────────

#[test]
fn backlog_upload_stops_at_first_failure() {
    let rig = Rig::new();
    rig.buffer_readings(5);
    let uploads = Arc::new(AtomicUsize::new(0));
    let counter = uploads.clone();
    rig.script.respond(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 3 {
            Ok(reply(500, ""))
        } else {
            Ok(reply(201, "{}"))
        }
    });

    let removed = rig.uplink().upload_backlog(&*rig.buffer);

    assert_eq!(removed, 3);
    assert_eq!(uploads.load(Ordering::SeqCst), 4);
    let buffer = rig.buffer.lock().unwrap();
    assert_eq!(buffer.count(), 2);
    assert_eq!(buffer.get(0).as_deref(), Some("{\"n\":3}"));
    let calls = rig.script.calls();
    assert!(calls.iter().all(|c| c.url == READINGS_URL));
    assert_eq!(calls[0].body.as_deref(), Some("{\"n\":0}"));
}

#[test]
fn worker_uploads_backlog_first_then_per_interval() {
    let rig = Rig::new();
    rig.buffer_readings(2);
    let mut worker = rig.worker(rig.network());

    assert_eq!(worker.tick(0).readings_uploaded, Some(2));
    rig.buffer_readings(1);
    assert_eq!(worker.tick(1_000).readings_uploaded, None);
    assert_eq!(worker.tick(300_000).readings_uploaded, Some(1));
    assert!(rig.buffer.lock().unwrap().is_empty());
}

#[test]
fn empty_buffer_waits_for_the_interval() {
    let rig = Rig::new();
    let mut worker = rig.worker(rig.network());

    assert_eq!(worker.tick(0).readings_uploaded, None);
    assert!(rig.script.calls_to("/readings").is_empty());
}

// ── Settings ──────────────────────────────────────────────────

#[test]
fn settings_sync_updates_shared_settings() {
    let rig = Rig::new();
    rig.script.respond(|call| {
        if call.url.ends_with("/devices/settings") {
            assert_eq!(call.method, Method::Get);
            Ok(reply(
                200,
                r#"{"min_temp":-22.0,"max_temp":-16.5,"door_alarm_delay_seconds":120}"#,
            ))
        } else {
            Ok(reply(200, "{}"))
        }
    });
    let mut worker = rig.worker(rig.network());

    assert_eq!(worker.tick(0).settings_ok, Some(true));
    assert_eq!(
        rig.settings.get(),
        DeviceSettings {
            min_temp: -22.0,
            max_temp: -16.5,
            door_alarm_delay_seconds: 120,
        }
    );
    assert_eq!(worker.tick(30_000).settings_ok, None);
}

#[test]
fn incomplete_settings_are_ignored() {
    let rig = Rig::new();
    rig.script.respond(|_| Ok(reply(200, r#"{"min_temp":-30.0}"#)));
    let mut worker = rig.worker(rig.network());

    assert_eq!(worker.tick(0).settings_ok, Some(false));
    assert_eq!(rig.settings.get(), DeviceSettings::default());
}

// ── Reconnect ─────────────────────────────────────────────────

#[test]
fn dropped_link_is_reconnected_and_delivery_resumes() {
    let rig = Rig::new();
    rig.link.set_connected(false);
    rig.queue.try_push(event(1)).unwrap();
    let mut worker = rig.worker(rig.network());

    let report = worker.tick(0);

    assert_eq!(report.reconnect_ok, Some(true));
    assert_eq!(report.door.delivered, 1);
    assert_eq!(report.heartbeat_ok, Some(true));
}

#[test]
fn unreachable_network_is_retried_per_interval() {
    let rig = Rig::new();
    rig.link.set_connected(false);
    rig.queue.try_push(event(1)).unwrap();
    let mut network = rig.network();
    network.reachable = false;
    let mut worker = rig.worker(network);

    let first = worker.tick(0);
    assert_eq!(first.reconnect_ok, Some(false));
    assert_eq!(first.heartbeat_ok, None);
    assert_eq!(first.settings_ok, None);
    assert_eq!(worker.tick(30_000).reconnect_ok, None);
    assert_eq!(worker.tick(60_000).reconnect_ok, Some(false));

    assert_eq!(rig.queue.len(), 1);
    assert!(rig.script.calls().is_empty());
}

#[test]
fn outage_does_not_stretch_the_heartbeat_interval() {
    let rig = Rig::new();
    rig.link.set_connected(false);
    let mut network = rig.network();
    network.reachable = false;
    let mut worker = rig.worker(network);

    for t in (0..=900_000u64).step_by(1_000) {
        rig.clock.set(t);
        assert_eq!(worker.tick(t).heartbeat_ok, None);
    }
    assert_eq!(worker.heartbeat_schedule().interval_ms(), 10_000);
    assert!(rig.script.calls().is_empty());
    let status = rig.status.snapshot();
    assert!(!status.connected_to_api);
    assert_eq!(status.last_error.as_str(), OFFLINE_TEXT);

    rig.link.set_connected(true);
    rig.clock.set(901_000);
    assert_eq!(worker.tick(901_000).heartbeat_ok, Some(true));
    assert_eq!(rig.script.calls_to("/devices/heartbeat").len(), 1);
    assert!(rig.status.snapshot().connected_to_api);
}

#[test]
fn heartbeat_after_short_outage_skips_remaining_backoff() {
    let rig = Rig::new();
    rig.script.respond(|call| {
        if call.url.ends_with("/devices/heartbeat") {
            Ok(reply(500, ""))
        } else {
            Ok(reply(200, "{}"))
        }
    });
    let mut network = rig.network();
    network.reachable = false;
    let mut worker = rig.worker(network);
    assert_eq!(worker.tick(0).heartbeat_ok, Some(false));
    assert_eq!(worker.tick(20_000).heartbeat_ok, Some(false));
    assert_eq!(worker.heartbeat_schedule().interval_ms(), 40_000);

    rig.link.set_connected(false);
    assert_eq!(worker.tick(21_000).heartbeat_ok, None);
    rig.link.set_connected(true);
    rig.script.respond(|_| Ok(reply(200, "{}")));
    assert_eq!(worker.tick(22_000).heartbeat_ok, Some(true));
    assert_eq!(worker.heartbeat_schedule().interval_ms(), 10_000);
}
