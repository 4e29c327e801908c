// ── Auto-setup state machine ──
//
// Brings a Gen2+ device to the daemon's baseline: system settings,
// current stable firmware, Matter off, MQTT pointed at our broker, the
// watchdog script running, and a nightly auto-update job. Each step is
// tagged on failure; nothing is rolled back.

use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use myhome_api::Method;
use myhome_api::shelly::methods::{
    CheckForUpdate, GetDeviceInfo, JobCall, JobSpec, JobUpdate, MatterConfig, MatterSetConfig,
    MatterSetConfigParams, MqttDeviceConfig, MqttSetConfig, MqttSetConfigParams, NoParams,
    Reboot, RebootParams, ScheduleCreate, ScheduleList, ScheduleUpdate, ScriptConfigPatch,
    ScriptCreate, ScriptCreateParams, ScriptDelete, ScriptEntry, ScriptId, ScriptList,
    ScriptSetConfig, ScriptSetConfigParams, ScriptStart, ScriptStop, SysConfigPatch, SysDevice,
    SysGetConfig, SysSetConfig, SysSetConfigParams, SysSntp, Update, UpdateParams,
};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SetupTimings;
use crate::error::CoreError;
use crate::model::Device;
use crate::script::{UploadOutcome, read_code, upload_with_version, write_code};
use crate::shelly::{DeviceRpc, call};

pub const WATCHDOG_NAME: &str = "watchdog.js";
pub const WATCHDOG_SCRIPT: &str = include_str!("../assets/watchdog.js");
/// Setup leaves the watchdog as the device's first script.
pub const WATCHDOG_ID: u32 = 1;

/// Desired end state for one device.
#[derive(Debug, Clone)]
pub struct SetupPlan {
    /// Device name to push to `sys.device.name`.
    pub name: Option<String>,
    pub sntp_server: Option<String>,
    pub mqtt: MqttDeviceConfig,
    pub timings: SetupTimings,
}

impl SetupPlan {
    /// MQTT settings with RPC and status notifications enabled.
    pub fn new(device_id: &str, broker: &str, timings: SetupTimings) -> Self {
        Self {
            name: None,
            sntp_server: None,
            mqtt: MqttDeviceConfig {
                enable: true,
                server: broker.to_owned(),
                client_id: Some(device_id.to_owned()),
                user: None,
                pass: None,
                rpc_ntf: true,
                status_ntf: true,
                enable_control: true,
            },
            timings,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetupReport {
    /// The watchdog was already running; nothing was touched.
    pub already_done: bool,
    pub system_updated: bool,
    pub firmware_updates: u32,
    pub rebooted: bool,
    pub script: Option<UploadOutcome>,
    pub update_job: Option<u32>,
}

// ── Once-per-device runner ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupState {
    Running,
    Finished,
}

/// Marks the device finished when the setup future ends or is dropped.
struct Claim<'a> {
    states: &'a DashMap<String, SetupState>,
    id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.states.insert(self.id.clone(), SetupState::Finished);
    }
}

/// Tracks which devices were set up and builds their plans.
pub struct SetupRunner {
    states: DashMap<String, SetupState>,
    broker: String,
    user: Option<String>,
    pass: Option<SecretString>,
    sntp_server: Option<String>,
    timings: SetupTimings,
}

impl SetupRunner {
    pub fn new(
        broker: String,
        user: Option<String>,
        pass: Option<SecretString>,
        sntp_server: Option<String>,
        timings: SetupTimings,
    ) -> Self {
        Self {
            states: DashMap::new(),
            broker,
            user,
            pass,
            sntp_server,
            timings,
        }
    }

    pub fn plan_for(&self, device: &Device) -> SetupPlan {
        let mut plan = SetupPlan::new(&device.id, &self.broker, self.timings.clone());
        plan.name = Some(device.name.clone()).filter(|n| !n.is_empty());
        plan.sntp_server.clone_from(&self.sntp_server);
        plan.mqtt.user.clone_from(&self.user);
        plan.mqtt.pass = self.pass.as_ref().map(|p| p.expose_secret().to_owned());
        plan
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.states
            .get(id)
            .is_some_and(|s| *s == SetupState::Running)
    }

    /// Automatic setups claim a device once per process; explicit ones
    /// only require that no setup is currently running.
    fn claim(&self, id: &str, explicit: bool) -> Option<Claim<'_>> {
        match self.states.entry(id.to_owned()) {
            Entry::Vacant(v) => {
                v.insert(SetupState::Running);
            }
            Entry::Occupied(mut o) if explicit && *o.get() == SetupState::Finished => {
                o.insert(SetupState::Running);
            }
            Entry::Occupied(_) => return None,
        }
        Some(Claim {
            states: &self.states,
            id: id.to_owned(),
        })
    }

    /// Run setup unless another one holds the device. `Ok(None)` means an
    /// automatic setup was skipped.
    pub async fn run_once(
        &self,
        rpc: &(impl DeviceRpc + ?Sized),
        device: &Device,
        explicit: bool,
    ) -> Result<Option<SetupReport>, CoreError> {
        let Some(_claim) = self.claim(&device.id, explicit) else {
            if explicit {
                return Err(CoreError::Busy {
                    what: format!("setup of {}", device.id),
                });
            }
            return Ok(None);
        };
        run(rpc, &self.plan_for(device)).await.map(Some)
    }
}

pub async fn run(rpc: &(impl DeviceRpc + ?Sized), plan: &SetupPlan) -> Result<SetupReport, CoreError> {
    let device = rpc.device_id().to_owned();
    let mut report = SetupReport::default();

    if watchdog_running(rpc).await.map_err(|e| e.in_step("idempotency"))? {
        debug!(device = %device, "already set up");
        report.already_done = true;
        return Ok(report);
    }
    info!(device = %device, "auto-setup starting");

    report.system_updated = system_config(rpc, plan)
        .await
        .map_err(|e| e.in_step("system"))?;

    report.firmware_updates = within(
        "firmware update",
        plan.timings.firmware_budget,
        firmware_loop(rpc, &plan.timings),
    )
    .await
    .map_err(|e| e.in_step("firmware"))?;

    if let Err(e) = call::<MatterSetConfig>(
        rpc,
        &MatterSetConfigParams {
            config: MatterConfig { enable: false },
        },
    )
    .await
    {
        debug!(device = %device, error = %e, "matter not disabled");
    }

    report.rebooted = mqtt_config(rpc, plan)
        .await
        .map_err(|e| e.in_step("mqtt"))?;

    report.script = Some(
        within(
            "watchdog upload",
            plan.timings.script_budget,
            watchdog_in_first_slot(rpc),
        )
        .await
        .map_err(|e| e.in_step("script"))?,
    );

    report.update_job = Some(
        update_schedule(rpc)
            .await
            .map_err(|e| e.in_step("schedule"))?,
    );

    info!(
        device = %device,
        firmware_updates = report.firmware_updates,
        rebooted = report.rebooted,
        "auto-setup complete"
    );
    Ok(report)
}

pub(crate) async fn within<T>(
    operation: &str,
    budget: Duration,
    fut: impl Future<Output = Result<T, CoreError>>,
) -> Result<T, CoreError> {
    tokio::time::timeout(budget, fut)
        .await
        .map_err(|_| CoreError::Timeout {
            operation: operation.to_owned(),
            timeout_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
        })?
}

/// Run `work` on its own task so that it finishes even when the caller
/// goes away. Only daemon shutdown stops it early.
pub(crate) async fn detached<T: Send + 'static>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T, CoreError>> + Send + 'static,
) -> Result<T, CoreError> {
    let cancel = cancel.clone();
    let task = tokio::spawn(async move {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CoreError::Internal("daemon stopping".into())),
            r = work => r,
        }
    });
    task.await
        .map_err(|e| CoreError::Internal(format!("detached task failed: {e}")))?
}

async fn watchdog_running(rpc: &(impl DeviceRpc + ?Sized)) -> Result<bool, CoreError> {
    let list = call::<ScriptList>(rpc, &NoParams {}).await?;
    Ok(list
        .scripts
        .iter()
        .any(|s| s.id == WATCHDOG_ID && s.name == WATCHDOG_NAME && s.running))
}

// ── Watchdog slot ──

/// A script moved out of the watchdog's slot, with its code.
struct Displaced {
    entry: ScriptEntry,
    code: String,
}

/// Upload the watchdog so it lands at [`WATCHDOG_ID`]. A stray copy
/// elsewhere is removed; another script holding the slot is recreated
/// after the watchdog, even when the upload fails.
async fn watchdog_in_first_slot(rpc: &(impl DeviceRpc + ?Sized)) -> Result<UploadOutcome, CoreError> {
    let displaced = free_watchdog_slot(rpc).await?;
    let uploaded = upload_with_version(rpc, WATCHDOG_NAME, WATCHDOG_SCRIPT, false).await;
    if let Some(displaced) = displaced {
        let name = displaced.entry.name.clone();
        let id = restore(rpc, displaced).await?;
        info!(device = rpc.device_id(), script = %name, id, "script moved out of the watchdog slot");
    }
    let outcome = uploaded?;
    if outcome.id != WATCHDOG_ID {
        warn!(device = rpc.device_id(), id = outcome.id, "watchdog did not land in the first slot");
    }
    Ok(outcome)
}

async fn free_watchdog_slot(rpc: &(impl DeviceRpc + ?Sized)) -> Result<Option<Displaced>, CoreError> {
    let list = call::<ScriptList>(rpc, &NoParams {}).await?;
    let mut displaced = None;
    for script in list.scripts {
        let stray = script.name == WATCHDOG_NAME && script.id != WATCHDOG_ID;
        let squatter = script.name != WATCHDOG_NAME && script.id == WATCHDOG_ID;
        if !stray && !squatter {
            continue;
        }
        let code = if squatter {
            Some(read_code(rpc, script.id).await?)
        } else {
            None
        };
        if script.running {
            call::<ScriptStop>(rpc, &ScriptId { id: script.id }).await?;
        }
        call::<ScriptDelete>(rpc, &ScriptId { id: script.id }).await?;
        debug!(device = rpc.device_id(), script = %script.name, id = script.id, "slot cleared");
        if let Some(code) = code {
            displaced = Some(Displaced {
                entry: script,
                code,
            });
        }
    }
    Ok(displaced)
}

async fn restore(rpc: &(impl DeviceRpc + ?Sized), displaced: Displaced) -> Result<u32, CoreError> {
    let Displaced { entry, code } = displaced;
    let id = call::<ScriptCreate>(rpc, &ScriptCreateParams { name: entry.name })
        .await?
        .id;
    write_code(rpc, id, &code).await?;
    if entry.enable {
        call::<ScriptSetConfig>(
            rpc,
            &ScriptSetConfigParams {
                id,
                config: ScriptConfigPatch {
                    name: None,
                    enable: Some(true),
                },
            },
        )
        .await?;
    }
    if entry.running {
        call::<ScriptStart>(rpc, &ScriptId { id }).await?;
    }
    Ok(id)
}

async fn system_config(rpc: &(impl DeviceRpc + ?Sized), plan: &SetupPlan) -> Result<bool, CoreError> {
    let current = call::<SysGetConfig>(rpc, &NoParams {}).await?;
    let mut patch = SysConfigPatch::default();
    if let Some(name) = plan.name.as_ref().filter(|n| current.device.name.as_ref() != Some(*n)) {
        patch.device = Some(SysDevice {
            name: Some(name.clone()),
        });
    }
    if let Some(server) = plan
        .sntp_server
        .as_ref()
        .filter(|s| current.sntp.server.as_ref() != Some(*s))
    {
        patch.sntp = Some(SysSntp {
            server: Some(server.clone()),
        });
    }
    if patch.device.is_none() && patch.sntp.is_none() {
        return Ok(false);
    }
    call::<SysSetConfig>(rpc, &SysSetConfigParams { config: patch }).await?;
    Ok(true)
}

async fn firmware_loop(
    rpc: &(impl DeviceRpc + ?Sized),
    timings: &SetupTimings,
) -> Result<u32, CoreError> {
    let mut applied = 0;
    while applied < timings.max_firmware_rounds {
        let available = call::<CheckForUpdate>(rpc, &NoParams {}).await?;
        let Some(stable) = available.stable else {
            break;
        };
        info!(device = rpc.device_id(), version = %stable.version, "updating firmware");
        call::<Update>(rpc, &UpdateParams::stable()).await?;
        applied += 1;

        tokio::time::sleep(timings.update_settle).await;
        tokio::time::sleep(timings.update_offline).await;
        wait_until_back(rpc, timings.recontact_interval, timings.recontact_attempts).await?;
    }
    Ok(applied)
}

/// `true` when the MQTT change required a reboot.
async fn mqtt_config(rpc: &(impl DeviceRpc + ?Sized), plan: &SetupPlan) -> Result<bool, CoreError> {
    let result = call::<MqttSetConfig>(
        rpc,
        &MqttSetConfigParams {
            config: plan.mqtt.clone(),
        },
    )
    .await?;
    if !result.restart_required {
        return Ok(false);
    }
    call::<Reboot>(rpc, &RebootParams::default()).await?;
    wait_until_back(
        rpc,
        plan.timings.reboot_interval,
        plan.timings.reboot_attempts,
    )
    .await?;
    Ok(true)
}

async fn wait_until_back(
    rpc: &(impl DeviceRpc + ?Sized),
    interval: Duration,
    attempts: u32,
) -> Result<(), CoreError> {
    let mut last = None;
    for attempt in 1..=attempts.max(1) {
        tokio::time::sleep(interval).await;
        match call::<GetDeviceInfo>(rpc, &NoParams {}).await {
            Ok(_) => return Ok(()),
            Err(e) => {
                debug!(device = rpc.device_id(), attempt, error = %e, "device not back yet");
                last = Some(e);
            }
        }
    }
    Err(CoreError::Transport {
        message: format!(
            "{} did not come back after {attempts} attempts: {}",
            rpc.device_id(),
            last.map_or_else(String::new, |e| e.to_string())
        ),
    })
}

/// `0 <m> <h> * * SUN-SAT` with the hour in {3, 4}.
pub fn update_timespec() -> String {
    let mut rng = rand::thread_rng();
    let hour = rng.gen_range(3..=4);
    let minute = rng.gen_range(0..60);
    format!("0 {minute} {hour} * * SUN-SAT")
}

async fn update_schedule(rpc: &(impl DeviceRpc + ?Sized)) -> Result<u32, CoreError> {
    let jobs = call::<ScheduleList>(rpc, &NoParams {}).await?.jobs;
    let calls = vec![JobCall {
        method: Update::NAME.to_owned(),
        params: Some(json!({ "stage": "stable" })),
    }];
    let timespec = update_timespec();

    let existing = jobs
        .iter()
        .find(|j| j.calls.iter().any(|c| c.method == Update::NAME));
    if let Some(job) = existing {
        call::<ScheduleUpdate>(
            rpc,
            &JobUpdate {
                id: job.id,
                enable: true,
                timespec,
                calls,
            },
        )
        .await?;
        return Ok(job.id);
    }
    let created = call::<ScheduleCreate>(
        rpc,
        &JobSpec {
            enable: true,
            timespec,
            calls,
        },
    )
    .await
    .inspect_err(|e| warn!(device = rpc.device_id(), error = %e, "update job not created"))?;
    Ok(created.id)
}
