//! Device command handlers.

use serde_json::Value;
use tabled::Tabled;

use myhome_core::Channel;
use myhome_core::{Device, MacAddress};
use myhome_core::rpc::params::{DeviceCall, DeviceRef, DeviceToken, SetRoom};

use crate::cli::{ChannelArg, DevicesArgs, DevicesCommand};
use crate::error::CliError;
use crate::output::or_dash;

use super::{Session, util};

const LIST: &str = "devices list";

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Room")]
    room: String,
    #[tabled(rename = "Last seen")]
    last_seen: String,
}

impl From<&Device> for DeviceRow {
    fn from(d: &Device) -> Self {
        Self {
            id: d.id.clone(),
            name: or_dash(&d.name),
            kind: d.kind.to_string(),
            host: or_dash(&d.host),
            room: or_dash(d.room_id.as_deref().unwrap_or_default()),
            last_seen: d
                .last_seen
                .map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

fn detail(d: &Device) -> String {
    let mut lines = vec![
        format!("ID:        {}", d.id),
        format!("Name:      {}", or_dash(&d.name)),
        format!("Kind:      {}", d.kind),
        format!(
            "MAC:       {}",
            d.mac.as_ref().map_or("-", MacAddress::as_str)
        ),
        format!("Host:      {}", or_dash(&d.host)),
        format!("Room:      {}", d.room_id.as_deref().unwrap_or("-")),
        format!("Revision:  {}", d.config_revision),
    ];
    if let Some(seen) = d.last_seen {
        lines.push(format!("Last seen: {}", seen.to_rfc3339()));
    }
    if let Some(fw) = d.info.get("fw_id").and_then(Value::as_str) {
        lines.push(format!("Firmware:  {fw}"));
    }
    if d.status.as_object().is_some_and(|s| !s.is_empty()) {
        let status = serde_json::to_string_pretty(&d.status).unwrap_or_default();
        lines.push(format!("Status:\n{status}"));
    }
    lines.join("\n")
}

fn channel(arg: ChannelArg) -> Channel {
    match arg {
        ChannelArg::Default => Channel::Default,
        ChannelArg::Http => Channel::Http,
        ChannelArg::Mqtt => Channel::Mqtt,
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(session: &Session, args: DevicesArgs) -> Result<(), CliError> {
    let p = session.printer;
    match args.command {
        DevicesCommand::List => {
            let devices: Vec<Device> = session.call("device.list", &Value::Null, LIST).await?;
            p.list(&devices, |d| DeviceRow::from(d), |d| d.id.clone())
        }

        DevicesCommand::Show { device } => {
            let device: Device = session
                .call("device.show", &DeviceToken { device }, LIST)
                .await?;
            p.single(&device, detail, |d| d.id.clone())
        }

        DevicesCommand::Forget { device } => {
            if !util::confirm(
                "forget a device",
                &format!("Forget device {device}?"),
                session.yes,
            )? {
                return Ok(());
            }
            let gone: DeviceRef = session
                .call("device.forget", &DeviceToken { device }, LIST)
                .await?;
            p.done(&format!("Forgot {}", gone.id));
            Ok(())
        }

        DevicesCommand::Setup { device } => {
            let report: Value = session
                .call("device.setup", &DeviceToken { device }, LIST)
                .await?;
            p.value(&report)
        }

        DevicesCommand::Refresh { device } => {
            let device: Device = session
                .call("device.refresh", &DeviceToken { device }, LIST)
                .await?;
            p.single(&device, detail, |d| d.id.clone())
        }

        DevicesCommand::Call {
            device,
            method,
            params,
            channel: via,
        } => {
            let call = DeviceCall {
                device,
                method,
                params: util::parse_params(params.as_deref())?,
                channel: channel(via),
            };
            let out: Value = session.call("device.call", &call, LIST).await?;
            p.value(&out)
        }

        DevicesCommand::Room { device, room } => {
            let device: Device = session
                .call("device.set_room", &SetRoom { device, room }, LIST)
                .await?;
            p.done(&format!(
                "{} is now in {}",
                device.display_name(),
                device.room_id.as_deref().unwrap_or("no room")
            ));
            Ok(())
        }
    }
}
