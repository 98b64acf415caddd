//! Remote command polling, execution and completion reporting.
//!
//! ```text
//!  poll ──▶ first command ──▶ duplicate? ──▶ heap ok? ──▶ actuator ──▶ heap ok? ──▶ PATCH complete
//!                               skip           defer                     defer
//! ```
//!
//! At most one command runs per cycle.  A command id that ran inside the
//! cooldown window is skipped even if the server returns it again.  When
//! memory is short the command is neither executed nor reported, so it
//! stays pending on the server and comes back on a later poll.

pub mod types;

use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::json;

use crate::app::ports::{ActuatorPort, SystemPort};
use crate::config::SystemConfig;
use crate::error::{Error, TransportError};
use crate::transport::{CallProfile, HttpClient, Method};
use crate::uplink::ApiClient;
use crate::uplink::payloads::{CompletionBody, PendingCommands, to_json};

use types::{CommandOutcome, PendingCommand};

// ───────────────────────────────────────────────────────────────
// Duplicate suppression
// ───────────────────────────────────────────────────────────────

/// Remembers the last executed command id and when it ran.
#[derive(Debug, Clone, Default)]
pub struct Deduplicator {
    cooldown_ms: u64,
    last: Option<(String, u64)>,
}

impl Deduplicator {
    pub fn new(cooldown_ms: u64) -> Self {
        Self {
            cooldown_ms,
            last: None,
        }
    }

    /// True if `id` executed less than the cooldown ago.
    pub fn is_duplicate(&self, id: &str, now_ms: u64) -> bool {
        self.last.as_ref().is_some_and(|(last_id, at)| {
            last_id == id && now_ms.saturating_sub(*at) < self.cooldown_ms
        })
    }

    pub fn record(&mut self, id: &str, now_ms: u64) {
        self.last = Some((id.to_string(), now_ms));
    }
}

// ───────────────────────────────────────────────────────────────
// Dispatcher
// ───────────────────────────────────────────────────────────────

/// What one [`CommandDispatcher::run_cycle`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing pending (or the poll failed).
    Idle,
    /// Free heap below the execution threshold; nothing polled.
    LowMemory,
    Duplicate(String),
    /// Executed and reported.
    Completed { id: String, success: bool },
    /// Executed, but the completion report was skipped or failed.
    Unreported { id: String, success: bool },
}

pub struct CommandDispatcher<C: HttpClient, A: ActuatorPort> {
    client: ApiClient<C>,
    actuator: A,
    system: Arc<dyn SystemPort>,
    dedup: Deduplicator,
    min_heap_execute: u32,
    min_heap_report: u32,
}

impl<C: HttpClient, A: ActuatorPort> CommandDispatcher<C, A> {
    pub fn new(
        client: ApiClient<C>,
        actuator: A,
        system: Arc<dyn SystemPort>,
        config: &SystemConfig,
    ) -> Self {
        Self {
            client,
            actuator,
            system,
            dedup: Deduplicator::new(u64::from(config.command_cooldown_secs) * 1000),
            min_heap_execute: config.min_free_heap_execute,
            min_heap_report: config.min_free_heap_report,
        }
    }

    /// GET the pending set and return its first command.
    pub fn poll(&self) -> Result<Option<PendingCommand>, Error> {
        let resp = self.client.exchange(
            &CallProfile::COMMANDS,
            Method::Get,
            "/devices/commands/pending",
            None,
        )?;
        match resp.status {
            200 => {}
            429 => warn!("Commands: poll rate limited (429)"),
            401 => warn!("Commands: device key rejected (401)"),
            other => warn!("Commands: poll returned HTTP {}", other),
        }
        if resp.status != 200 {
            return Err(TransportError::from_status(resp.status).into());
        }
        let cmd = PendingCommands::first(&resp.body)?;
        Ok(cmd.filter(PendingCommand::is_actionable))
    }

    /// Run `cmd` on the controller.  Never fails; errors become a failed
    /// outcome carrying the reason.
    pub fn execute(&mut self, cmd: &PendingCommand) -> CommandOutcome {
        let kind = cmd.kind();
        info!("Commands: executing {} (id={})", cmd.command_type, cmd.id);
        match self.actuator.write_command(kind, &cmd.parameters) {
            Ok(result) => {
                info!("Commands: {} succeeded", kind.as_str());
                CommandOutcome {
                    success: true,
                    result,
                }
            }
            Err(e) => {
                error!("Commands: {} failed: {}", cmd.command_type, e);
                CommandOutcome {
                    success: false,
                    result: json!({ "error": e.to_string() }),
                }
            }
        }
    }

    /// PATCH the completion endpoint; only HTTP 200 counts.
    pub fn complete(&self, id: &str, outcome: &CommandOutcome) -> Result<(), Error> {
        let body = to_json(&CompletionBody::new(outcome.success, &outcome.result))?;
        let path = format!("/devices/commands/{id}/complete");
        let resp = self
            .client
            .exchange(&CallProfile::COMMANDS, Method::Patch, &path, Some(&body))?;
        if resp.status == 200 {
            Ok(())
        } else {
            Err(TransportError::from_status(resp.status).into())
        }
    }

    /// One poll/execute/report cycle.
    pub fn run_cycle(&mut self, now_ms: u64) -> CycleOutcome {
        let free = self.system.free_heap_bytes();
        if free < self.min_heap_execute {
            warn!("Commands: low memory ({} bytes free), skipping poll", free);
            return CycleOutcome::LowMemory;
        }

        let cmd = match self.poll() {
            Ok(Some(cmd)) => cmd,
            Ok(None) => return CycleOutcome::Idle,
            Err(e) => {
                debug!("Commands: poll failed: {}", e);
                return CycleOutcome::Idle;
            }
        };

        if self.dedup.is_duplicate(&cmd.id, now_ms) {
            debug!("Commands: skipping duplicate {}", cmd.id);
            return CycleOutcome::Duplicate(cmd.id);
        }

        self.dedup.record(&cmd.id, now_ms);
        let outcome = self.execute(&cmd);

        let free = self.system.free_heap_bytes();
        if free <= self.min_heap_report {
            error!("Commands: not enough memory to report {} ({} bytes free)", cmd.id, free);
            return CycleOutcome::Unreported {
                id: cmd.id,
                success: outcome.success,
            };
        }

        match self.complete(&cmd.id, &outcome) {
            Ok(()) => {
                info!("Commands: completion of {} reported", cmd.id);
                CycleOutcome::Completed {
                    id: cmd.id,
                    success: outcome.success,
                }
            }
            Err(e) => {
                error!("Commands: completion report for {} failed: {}", cmd.id, e);
                CycleOutcome::Unreported {
                    id: cmd.id,
                    success: outcome.success,
                }
            }
        }
    }
}
