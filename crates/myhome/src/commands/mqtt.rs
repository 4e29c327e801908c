//! Message cache commands.

use myhome_core::CacheStats;
use myhome_core::rpc::params::Topic;
use serde_json::Value;

use crate::cli::{MqttArgs, MqttCommand};
use crate::error::CliError;

use super::Session;

fn detail(s: &CacheStats) -> String {
    [
        format!("Entries: {}", s.entries),
        format!("Size:    {} bytes", s.weighted_size),
        format!("Budget:  {} bytes", s.budget),
    ]
    .join("\n")
}

pub async fn handle(session: &Session, args: MqttArgs) -> Result<(), CliError> {
    let p = session.printer;
    match args.command {
        MqttCommand::Repeat { topic } => {
            let () = session
                .call("mqtt.repeat", &Topic { topic: topic.clone() }, "mqtt stats")
                .await?;
            p.done(&format!("Republished {topic}"));
            Ok(())
        }
        MqttCommand::Stats => {
            let stats: CacheStats = session.call("mqtt.stats", &Value::Null, "mqtt stats").await?;
            p.single(&stats, detail, |s| s.entries.to_string())
        }
    }
}
