//! Boot flow: reset window, provisioning load, WiFi, portal, handshake.

use std::sync::Arc;

use coldmonitor::app::ports::{PortalSubmission, StoragePort};
use coldmonitor::app::status::SharedStatus;
use coldmonitor::boot::provisioning::{ProvisioningRecord, ProvisioningStore, WIFI_NAMESPACE};
use coldmonitor::boot::{BootController, BootState, BootPorts, RestartReason, RunMode};
use coldmonitor::config::{PORTAL_AP_NAME, SystemConfig};
use coldmonitor::transport::Method;
use coldmonitor::uplink::{GatedHandshake, HEARTBEAT_FAILED_TEXT};

use crate::mock_hw::{
    FakeClock, HttpScript, MockButtons, MockLink, MockNetwork, MockStorage, gate, reply, submission,
};

const MAC: &str = "24:6F:28:A1:B2:C3";
const HARDWARE_ID: &str = "CM-A1B2C3";

struct Rig {
    clock: Arc<FakeClock>,
    link: Arc<MockLink>,
    storage: MockStorage,
    buttons: MockButtons,
    network: MockNetwork,
    script: HttpScript,
    status: SharedStatus,
}

impl Rig {
    fn new() -> Self {
        let clock = FakeClock::new();
        let link = MockLink::offline();
        Self {
            buttons: MockButtons::idle(clock.clone()),
            network: MockNetwork::new(link.clone()),
            storage: MockStorage::new(),
            script: HttpScript::new(),
            status: SharedStatus::new(),
            clock,
            link,
        }
    }

    fn provisioned_with(mut self, sub: &PortalSubmission) -> Self {
        let record = ProvisioningRecord::from_submission(sub).unwrap();
        ProvisioningStore::new(&mut self.storage).save(&record).unwrap();
        self
    }

    fn provisioned(self) -> Self {
        self.provisioned_with(&submission())
    }

    fn run(&mut self) -> (RunMode, BootState) {
        let mut handshake = GatedHandshake::new(
            gate(&self.script, self.clock.clone()),
            self.link.clone(),
            MAC,
            self.status.clone(),
        );
        let mut boot = BootController::new(SystemConfig::default(), self.status.clone(), HARDWARE_ID);
        let mode = boot.run(&mut BootPorts {
            storage: &mut self.storage,
            buttons: &mut self.buttons,
            network: &mut self.network,
            handshake: &mut handshake,
            clock: &*self.clock,
        });
        (mode, boot.state())
    }

    fn stored(&mut self) -> ProvisioningRecord {
        ProvisioningStore::new(&mut self.storage).load()
    }
}

// ── Portal ────────────────────────────────────────────────────

#[test]
fn unprovisioned_device_saves_portal_input_and_restarts() {
    let mut rig = Rig::new();
    rig.storage.put(WIFI_NAMESPACE, "ssid", "stale").unwrap();
    rig.network.submission = Some(submission());

    let (mode, state) = rig.run();

    assert_eq!(mode, RunMode::RequestRestart(RestartReason::ProvisioningSaved));
    assert_eq!(state, BootState::ConfigPortal);
    assert_eq!(rig.network.portal_opens, vec![PORTAL_AP_NAME.to_string()]);
    assert_eq!(rig.network.forgets, 1);
    assert_eq!(rig.storage.get(WIFI_NAMESPACE, "ssid").unwrap(), None);

    let record = rig.stored();
    assert!(record.is_complete());
    assert_eq!(record.api_url, "https://api.example.com");
    assert_eq!(record.device_serial, "CM-0001");
    assert!(rig.script.calls().is_empty());
}

#[test]
fn portal_timeout_leaves_device_unprovisioned() {
    let mut rig = Rig::new();

    let (mode, _) = rig.run();

    assert_eq!(mode, RunMode::PortalActive);
    assert!(!rig.stored().provisioned);
    assert!(rig.network.joined.is_empty());
}

#[test]
fn invalid_portal_input_is_not_persisted() {
    let mut rig = Rig::new();
    rig.network.submission = Some(PortalSubmission {
        wifi_ssid: String::new(),
        ..submission()
    });

    let (mode, _) = rig.run();

    assert_eq!(mode, RunMode::PortalActive);
    assert_eq!(rig.status.snapshot().last_error.as_str(), "Provisioning input invalid");
    assert!(!rig.stored().has_api());
}

#[test]
fn failed_save_keeps_portal_active() {
    let mut rig = Rig::new();
    rig.network.submission = Some(submission());
    rig.storage.fail_writes(true);

    let (mode, _) = rig.run();

    assert_eq!(mode, RunMode::PortalActive);
    assert_eq!(rig.status.snapshot().last_error.as_str(), "Provisioning save failed");
}

// ── WiFi and handshake ────────────────────────────────────────

#[test]
fn provisioned_device_reaches_run() {
    let mut rig = Rig::new().provisioned();

    let (mode, state) = rig.run();

    let RunMode::Run(session) = mode else {
        panic!("expected RUN, got {mode:?}");
    };
    assert_eq!(state, BootState::Run);
    assert_eq!(session.serial, "CM-0001");
    assert_eq!(session.api.base_url, "https://api.example.com");
    assert_eq!(rig.network.joined, vec!["ColdRoom".to_string()]);

    let status = rig.status.snapshot();
    assert!(status.connected_to_wifi);
    assert!(status.connected_to_api);
    assert!(status.last_error.is_empty());
    assert!(status.last_heartbeat_ms.is_some());

    let calls = rig.script.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].method, Method::Post);
    assert_eq!(calls[0].url, "https://api.example.com/devices/heartbeat");
    assert_eq!(calls[0].device_key, "abcdef123456");
    let hb = calls[0].body_json();
    assert_eq!(hb["deviceId"], MAC);
    assert_eq!(hb["ip"], "10.0.0.42");
    assert_eq!(hb["connected_to_wifi"], true);
    assert_eq!(calls[1].method, Method::Get);
    assert_eq!(calls[1].url, "https://api.example.com/health");
}

#[test]
fn missing_serial_falls_back_to_hardware_id() {
    let mut rig = Rig::new().provisioned_with(&PortalSubmission {
        device_serial: String::new(),
        ..submission()
    });

    let (mode, _) = rig.run();

    let RunMode::Run(session) = mode else {
        panic!("expected RUN, got {mode:?}");
    };
    assert_eq!(session.serial, HARDWARE_ID);
}

#[test]
fn handshake_failure_still_enters_run() {
    let mut rig = Rig::new().provisioned();
    rig.script.respond(|_| Ok(reply(500, "")));

    let (mode, state) = rig.run();

    assert!(matches!(mode, RunMode::Run(_)));
    assert_eq!(state, BootState::Run);
    let status = rig.status.snapshot();
    assert!(status.connected_to_wifi);
    assert!(!status.connected_to_api);
    assert_eq!(status.last_error.as_str(), HEARTBEAT_FAILED_TEXT);
    // no health check after a failed heartbeat
    assert_eq!(rig.script.calls().len(), 1);
}

#[test]
fn unreachable_wifi_falls_back_to_portal() {
    let mut rig = Rig::new().provisioned();
    rig.network.reachable = false;

    let (mode, state) = rig.run();

    assert_eq!(mode, RunMode::PortalActive);
    assert_eq!(state, BootState::ConfigPortal);
    assert!(!rig.status.snapshot().connected_to_wifi);
    assert_eq!(rig.network.portal_opens.len(), 1);
    assert!(rig.script.calls().is_empty());
    // the old record survives a portal timeout
    assert!(rig.stored().is_complete());
}

#[test]
fn new_credentials_after_wifi_failure_request_restart() {
    let mut rig = Rig::new().provisioned();
    rig.network.reachable = false;
    rig.network.submission = Some(PortalSubmission {
        wifi_ssid: "ColdRoom-5G".into(),
        device_serial: String::new(),
        ..submission()
    });

    let (mode, _) = rig.run();

    assert_eq!(mode, RunMode::RequestRestart(RestartReason::ProvisioningSaved));
    let record = rig.stored();
    assert_eq!(record.wifi_ssid, "ColdRoom-5G");
    // serial carried over from the previous record
    assert_eq!(record.device_serial, "CM-0001");
}

// ── Factory reset ─────────────────────────────────────────────

#[test]
fn two_step_reset_during_boot_wipes_provisioning() {
    let mut rig = Rig::new().provisioned();
    rig.storage.put(WIFI_NAMESPACE, "ssid", "ColdRoom").unwrap();
    rig.buttons = MockButtons::new(rig.clock.clone(), |t| (t < 200, t >= 1_000));

    let (mode, state) = rig.run();

    assert_eq!(mode, RunMode::RequestRestart(RestartReason::FactoryReset));
    assert_eq!(state, BootState::Boot);
    assert_eq!(rig.stored(), ProvisioningRecord::default());
    assert_eq!(rig.storage.get(WIFI_NAMESPACE, "ssid").unwrap(), None);
    assert_eq!(rig.network.forgets, 1);
    assert!(rig.network.joined.is_empty());
    assert!(rig.buttons.indicator_on_count > 0);
    // triggered once RESET had been held for 3 s
    assert!(rig.clock.now() >= 4_000 && rig.clock.now() < 4_200);
}

#[test]
fn reset_released_early_continues_boot() {
    let mut rig = Rig::new().provisioned();
    rig.buttons = MockButtons::new(rig.clock.clone(), |t| (t < 200, (1_000..2_000).contains(&t)));

    let (mode, _) = rig.run();

    assert!(matches!(mode, RunMode::Run(_)));
    assert!(rig.stored().is_complete());
    assert!(!rig.buttons.indicator);
    // the whole 12 s check window elapsed before WiFi
    assert!(rig.clock.now() >= 12_000);
}
