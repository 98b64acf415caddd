//! Remote command cycle: poll, dedup, memory gates, execution, completion.

use std::sync::{Arc, Mutex};

use coldmonitor::adapters::controller::{ModbusController, SimLink};
use coldmonitor::commands::types::CommandType;
use coldmonitor::commands::{CommandDispatcher, CycleOutcome};
use coldmonitor::config::SystemConfig;
use coldmonitor::error::ActuatorError;
use coldmonitor::tasks::CommandWorker;
use coldmonitor::transport::Method;
use coldmonitor::uplink::ApiClient;
use serde_json::json;

use crate::mock_hw::{
    FakeClock, HttpScript, MockActuator, MockHttp, MockLink, MockSystem, api, gate, reply,
};

const PENDING: &str = r#"{"commands":[
    {"id":"c1","commandType":"DEFROST_START","parameters":null},
    {"id":"c2","commandType":"READ_TEMPERATURE"}
]}"#;

struct Rig {
    clock: Arc<FakeClock>,
    link: Arc<MockLink>,
    script: HttpScript,
    actuator: Arc<Mutex<MockActuator>>,
}

impl Rig {
    fn new() -> Self {
        Self {
            clock: FakeClock::new(),
            link: MockLink::online(),
            script: HttpScript::new(),
            actuator: MockActuator::shared(),
        }
    }

    /// Serve `pending` on GET and `status` on PATCH.
    fn serve(&self, pending: &'static str, status: u16) {
        self.script.respond(move |call| match call.method {
            Method::Get => Ok(reply(200, pending)),
            _ => Ok(reply(status, "{}")),
        });
    }

    fn client(&self) -> ApiClient<MockHttp> {
        ApiClient::new(
            gate(&self.script, self.clock.clone()),
            self.link.clone(),
            api(),
            "CM-0001",
        )
    }

    fn dispatcher(&self, system: Arc<MockSystem>) -> CommandDispatcher<MockHttp, Arc<Mutex<MockActuator>>> {
        CommandDispatcher::new(
            self.client(),
            self.actuator.clone(),
            system,
            &SystemConfig::default(),
        )
    }

    fn executed(&self) -> Vec<CommandType> {
        self.actuator.lock().unwrap().calls.clone()
    }
}

fn completed(id: &str, success: bool) -> CycleOutcome {
    CycleOutcome::Completed {
        id: id.into(),
        success,
    }
}

#[test]
fn first_pending_command_runs_and_is_reported() {
    let rig = Rig::new();
    rig.serve(PENDING, 200);
    let mut dispatcher = rig.dispatcher(MockSystem::with_heap(120_000));

    assert_eq!(dispatcher.run_cycle(0), completed("c1", true));

    assert_eq!(rig.executed(), vec![CommandType::DefrostStart]);
    let calls = rig.script.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].method, Method::Get);
    assert_eq!(calls[0].url, "https://api.example.com/devices/commands/pending");
    assert_eq!(calls[0].device_key, "abcdef123456");
    assert_eq!(calls[1].method, Method::Patch);
    assert_eq!(calls[1].url, "https://api.example.com/devices/commands/c1/complete");
    assert_eq!(
        calls[1].body_json(),
        json!({ "result": { "status": "defrost_started" } })
    );
}

#[test]
fn repeated_command_is_skipped_within_cooldown() {
    let rig = Rig::new();
    rig.serve(PENDING, 200);
    let mut dispatcher = rig.dispatcher(MockSystem::with_heap(120_000));

    assert_eq!(dispatcher.run_cycle(0), completed("c1", true));
    assert_eq!(dispatcher.run_cycle(30_000), CycleOutcome::Duplicate("c1".into()));
    assert_eq!(rig.executed().len(), 1);
    assert_eq!(rig.script.calls_to("/complete").len(), 1);

    // cooldown over: the server still lists it, so it runs again
    assert_eq!(dispatcher.run_cycle(60_000), completed("c1", true));
    assert_eq!(rig.executed().len(), 2);
}

#[test]
fn numeric_id_and_temperature_read() {
    let rig = Rig::new();
    rig.serve(r#"{"commands":[{"id":42,"commandType":"READ_TEMPERATURE"}]}"#, 200);
    let mut dispatcher = rig.dispatcher(MockSystem::with_heap(120_000));

    assert_eq!(dispatcher.run_cycle(0), completed("42", true));

    let patch = &rig.script.calls_to("/complete")[0];
    assert_eq!(patch.url, "https://api.example.com/devices/commands/42/complete");
    assert_eq!(patch.body_json()["result"]["temperature"], json!(-18.5));
}

#[test]
fn actuator_failure_is_reported_as_failed() {
    let rig = Rig::new();
    rig.serve(PENDING, 200);
    rig.actuator.lock().unwrap().fail = Some(ActuatorError::Timeout);
    let mut dispatcher = rig.dispatcher(MockSystem::with_heap(120_000));

    assert_eq!(dispatcher.run_cycle(0), completed("c1", false));

    let body = rig.script.calls_to("/complete")[0].body_json();
    assert_eq!(body["error"], "Command execution failed");
    assert_eq!(body["result"]["error"], "controller timeout");
}

#[test]
fn unknown_command_type_fails_with_reason() {
    let rig = Rig::new();
    rig.serve(r#"{"commands":[{"id":"x9","commandType":"SELF_DESTRUCT"}]}"#, 200);
    let mut dispatcher = rig.dispatcher(MockSystem::with_heap(120_000));

    assert_eq!(dispatcher.run_cycle(0), completed("x9", false));

    let body = rig.script.calls_to("/complete")[0].body_json();
    assert_eq!(body["result"]["error"], "Unknown command type");
}

#[test]
fn low_memory_skips_the_poll() {
    let rig = Rig::new();
    rig.serve(PENDING, 200);
    let mut dispatcher = rig.dispatcher(MockSystem::with_heap(9_000));

    assert_eq!(dispatcher.run_cycle(0), CycleOutcome::LowMemory);
    assert!(rig.script.calls().is_empty());
    assert!(rig.executed().is_empty());
}

#[test]
fn low_memory_after_execution_skips_the_report() {
    let rig = Rig::new();
    rig.serve(PENDING, 200);
    let mut dispatcher = rig.dispatcher(MockSystem::sequence(&[40_000, 5_000]));

    assert_eq!(
        dispatcher.run_cycle(0),
        CycleOutcome::Unreported {
            id: "c1".into(),
            success: true,
        }
    );
    assert_eq!(rig.executed().len(), 1);
    assert!(rig.script.calls_to("/complete").is_empty());
}

#[test]
fn failed_completion_is_unreported() {
    let rig = Rig::new();
    rig.serve(PENDING, 500);
    let mut dispatcher = rig.dispatcher(MockSystem::with_heap(120_000));

    assert_eq!(
        dispatcher.run_cycle(0),
        CycleOutcome::Unreported {
            id: "c1".into(),
            success: true,
        }
    );
}

#[test]
fn nothing_pending_or_bad_poll_is_idle() {
    let rig = Rig::new();
    let mut dispatcher = rig.dispatcher(MockSystem::with_heap(120_000));

    rig.serve(r#"{"commands":[]}"#, 200);
    assert_eq!(dispatcher.run_cycle(0), CycleOutcome::Idle);

    rig.serve(r#"{"pending":[]}"#, 200);
    assert_eq!(dispatcher.run_cycle(1_000), CycleOutcome::Idle);

    rig.script.respond(|_| Ok(reply(401, "")));
    assert_eq!(dispatcher.run_cycle(2_000), CycleOutcome::Idle);

    rig.serve(r#"{"commands":[{"id":"","commandType":"DEFROST_START"}]}"#, 200);
    assert_eq!(dispatcher.run_cycle(3_000), CycleOutcome::Idle);

    assert!(rig.executed().is_empty());
}

#[test]
fn offline_cycle_makes_no_request() {
    let rig = Rig::new();
    rig.link.set_connected(false);
    let mut dispatcher = rig.dispatcher(MockSystem::with_heap(120_000));

    assert_eq!(dispatcher.run_cycle(0), CycleOutcome::Idle);
    assert!(rig.script.calls().is_empty());
}

#[test]
fn worker_polls_on_interval_while_online() {
    let rig = Rig::new();
    rig.serve(PENDING, 200);
    let config = SystemConfig::default();
    let mut worker = CommandWorker::new(rig.dispatcher(MockSystem::with_heap(120_000)), &config);

    assert_eq!(worker.tick(0, false), None);
    assert_eq!(worker.tick(0, true), Some(completed("c1", true)));
    assert_eq!(worker.tick(10_000, true), None);
    assert_eq!(
        worker.tick(30_000, true),
        Some(CycleOutcome::Duplicate("c1".into()))
    );
    assert_eq!(rig.script.calls_to("/pending").len(), 2);
}

#[test]
fn commands_reach_the_refrigeration_controller() {
    let rig = Rig::new();
    rig.serve(r#"{"commands":[{"id":"t1","commandType":"READ_TEMPERATURE"}]}"#, 200);
    let mut dispatcher = CommandDispatcher::new(
        rig.client(),
        ModbusController::new(SimLink::new(1), 1),
        MockSystem::with_heap(120_000),
        &SystemConfig::default(),
    );

    assert_eq!(dispatcher.run_cycle(0), completed("t1", true));

    let body = rig.script.calls_to("/complete")[0].body_json();
    assert_eq!(body["result"]["temperature"], json!(-18.5));
}
