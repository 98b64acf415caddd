//! Door contact to server: debounce, startup gate, rate limit, ordered delivery.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use coldmonitor::adapters::nvs::NvsAdapter;
use coldmonitor::app::context::SharedSettings;
use coldmonitor::app::status::SharedStatus;
use coldmonitor::buffer::ReadingBuffer;
use coldmonitor::config::{DOOR_QUEUE_CAPACITY, FIRMWARE_VERSION, SystemConfig};
use coldmonitor::door::{DoorEvent, DoorEventQueue, PollOutcome};
use coldmonitor::tasks::{CaptureOutcome, CaptureWorker, DoorWorker, SharedReadingBuffer, UplinkWorker};
use coldmonitor::uplink::{ApiClient, TelemetryUplink};

use crate::mock_hw::{FakeClock, HttpScript, MockLink, MockNetwork, MockSensors, api, gate, reply};

struct Rig {
    clock: Arc<FakeClock>,
    link: Arc<MockLink>,
    sensors: Arc<Mutex<MockSensors>>,
    queue: Arc<DoorEventQueue>,
    first_reading: Arc<AtomicBool>,
    script: HttpScript,
    buffer: SharedReadingBuffer<NvsAdapter>,
    config: SystemConfig,
}

impl Rig {
    fn new(ready: bool) -> Self {
        Self {
            clock: FakeClock::new(),
            link: MockLink::online(),
            sensors: MockSensors::shared(),
            queue: Arc::new(DoorEventQueue::new()),
            first_reading: Arc::new(AtomicBool::new(ready)),
            script: HttpScript::new(),
            buffer: Arc::new(Mutex::new(ReadingBuffer::new(NvsAdapter::new().unwrap()))),
            config: SystemConfig::default(),
        }
    }

    fn door_worker(&self) -> DoorWorker<Arc<Mutex<MockSensors>>> {
        DoorWorker::new(
            self.sensors.clone(),
            self.queue.clone(),
            self.link.clone(),
            self.clock.clone(),
            self.first_reading.clone(),
            &self.config,
        )
    }

    fn uplink_worker(&self) -> UplinkWorker<crate::mock_hw::MockHttp, NvsAdapter, MockNetwork> {
        let client = ApiClient::new(
            gate(&self.script, self.clock.clone()),
            self.link.clone(),
            api(),
            "CM-0001",
        );
        UplinkWorker::new(
            TelemetryUplink::new(client, "24:6F:28:A1:B2:C3", FIRMWARE_VERSION, SharedStatus::new()),
            MockNetwork::new(self.link.clone()).remembering(),
            self.queue.clone(),
            self.buffer.clone(),
            SharedSettings::new(),
            &self.config,
        )
    }

    /// Set the contact and poll at `now_ms`.
    fn poll(&self, worker: &mut DoorWorker<Arc<Mutex<MockSensors>>>, open: bool, now_ms: u64) -> PollOutcome {
        self.sensors.lock().unwrap().door_open = open;
        self.clock.set(now_ms);
        worker.tick(now_ms)
    }

    /// Hold the contact from `from` to `to` (inclusive) at the poll period.
    fn hold(
        &self,
        worker: &mut DoorWorker<Arc<Mutex<MockSensors>>>,
        open: bool,
        from: u64,
        to: u64,
    ) -> Vec<PollOutcome> {
        (from..=to)
            .step_by(self.config.door_poll_interval_ms as usize)
            .map(|t| self.poll(worker, open, t))
            .filter(|o| *o != PollOutcome::Idle)
            .collect()
    }

    fn drain_queue(&self) -> Vec<DoorEvent> {
        core::iter::from_fn(|| self.queue.pop()).collect()
    }
}

#[test]
fn chatter_shorter_than_debounce_emits_nothing() {
    let rig = Rig::new(true);
    let mut door = rig.door_worker();

    for i in 0..100u64 {
        let t = i * 20;
        assert_eq!(rig.poll(&mut door, i % 2 == 0, t), PollOutcome::Idle);
    }
    assert!(rig.queue.is_empty());
    assert!(!door.pipeline().door_open());
}

#[test]
fn opening_confirms_after_the_debounce_window() {
    let rig = Rig::new(true);
    let mut door = rig.door_worker();

    assert_eq!(rig.poll(&mut door, true, 1_000), PollOutcome::Idle);
    assert_eq!(rig.poll(&mut door, true, 1_030), PollOutcome::Idle);
    assert_eq!(rig.poll(&mut door, true, 1_050), PollOutcome::Queued(1));

    let events = rig.drain_queue();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_open);
    assert_eq!(events[0].seq, 1);
    assert_eq!(events[0].timestamp_ms, 1_050);
    assert_eq!(events[0].uptime_ms, 1_050);
    assert_eq!(events[0].rssi, -61);
}

#[test]
fn door_events_wait_for_the_first_valid_reading() {
    let rig = Rig::new(false);
    let mut door = rig.door_worker();
    let mut capture = CaptureWorker::new(
        rig.sensors.clone(),
        rig.buffer.clone(),
        rig.clock.clone(),
        "CM-0001",
        rig.first_reading.clone(),
        &rig.config,
    );

    assert_eq!(rig.hold(&mut door, true, 0, 200), vec![PollOutcome::Suppressed]);
    assert!(rig.queue.is_empty());

    rig.sensors.lock().unwrap().snapshot.valid = false;
    assert_eq!(capture.tick(250), Some(CaptureOutcome::Invalid));
    assert_eq!(rig.hold(&mut door, false, 300, 400), vec![PollOutcome::Suppressed]);

    rig.sensors.lock().unwrap().snapshot.valid = true;
    assert_eq!(capture.tick(60_250), Some(CaptureOutcome::Buffered));
    assert_eq!(rig.hold(&mut door, true, 60_300, 60_400), vec![PollOutcome::Queued(1)]);
    assert!(door.pipeline().is_armed());

    let record = rig.buffer.lock().unwrap().get(0).unwrap();
    let json: serde_json::Value = serde_json::from_str(&record).unwrap();
    assert_eq!(json["doorStatus"], false);
    assert_eq!(json["deviceId"], "CM-0001");
}

#[test]
fn rate_limit_drops_excess_transitions_leaving_seq_gaps() {
    let rig = Rig::new(true);
    let mut door = rig.door_worker();

    // the contact flips every 100 ms, one confirmation per flip
    let outcomes: Vec<PollOutcome> = (0..=1_050u64)
        .step_by(50)
        .map(|t| rig.poll(&mut door, (t / 100) % 2 == 0, t))
        .filter(|o| *o != PollOutcome::Idle)
        .collect();

    let queued: Vec<u32> = outcomes
        .iter()
        .filter_map(|o| match o {
            PollOutcome::Queued(seq) => Some(*seq),
            _ => None,
        })
        .collect();
    let limited: Vec<u32> = outcomes
        .iter()
        .filter_map(|o| match o {
            PollOutcome::DroppedRateLimited(seq) => Some(*seq),
            _ => None,
        })
        .collect();

    assert_eq!(queued, vec![1, 2, 3, 4, 5, 11]);
    assert_eq!(limited, vec![6, 7, 8, 9, 10]);
    assert_eq!(rig.queue.len(), 6);
}

#[test]
fn full_queue_drops_the_new_event() {
    let rig = Rig::new(true);
    let mut door = rig.door_worker();
    for seq in 0..DOOR_QUEUE_CAPACITY as u32 {
        rig.queue
            .try_push(DoorEvent {
                is_open: false,
                timestamp_ms: 0,
                seq: 1_000 + seq,
                rssi: 0,
                uptime_ms: 0,
            })
            .unwrap();
    }

    assert_eq!(rig.hold(&mut door, true, 0, 100), vec![PollOutcome::DroppedQueueFull(1)]);
    assert_eq!(rig.queue.len(), DOOR_QUEUE_CAPACITY);
    assert_eq!(rig.queue.pop().map(|e| e.seq), Some(1_000));
}

#[test]
fn delivery_keeps_order_across_a_failed_send() {
    let rig = Rig::new(true);
    let mut door = rig.door_worker();
    let mut uplink = rig.uplink_worker();

    assert_eq!(rig.hold(&mut door, true, 0, 100), vec![PollOutcome::Queued(1)]);
    assert_eq!(rig.hold(&mut door, false, 400, 500), vec![PollOutcome::Queued(2)]);

    rig.script.respond(|call| {
        if call.body_json()["seq"] == 2 {
            Ok(reply(500, ""))
        } else {
            Ok(reply(201, "{}"))
        }
    });
    let report = uplink.tick(1_000);
    assert_eq!(report.door.delivered, 1);
    assert!(report.door.blocked);
    assert_eq!(uplink.delivery().pending_retry().map(|e| e.seq), Some(2));

    assert_eq!(rig.hold(&mut door, true, 1_200, 1_300), vec![PollOutcome::Queued(3)]);
    rig.script.respond(|_| Ok(reply(201, "{}")));
    let report = uplink.tick(2_000);
    assert_eq!(report.door.delivered, 2);
    assert!(uplink.delivery().pending_retry().is_none());

    let sent: Vec<u64> = rig
        .script
        .calls_to("/door-events")
        .iter()
        .map(|c| c.body_json()["seq"].as_u64().unwrap())
        .collect();
    assert_eq!(sent, vec![1, 2, 2, 3]);
}
