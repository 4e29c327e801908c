//! Script upload and removal.

use serde_json::Value;

use myhome_core::rpc::params::{ScriptDeleted, ScriptRef, ScriptUpload};

use crate::cli::{ScriptsArgs, ScriptsCommand};
use crate::error::CliError;

use super::Session;

const LIST: &str = "devices list";

pub async fn handle(session: &Session, args: ScriptsArgs) -> Result<(), CliError> {
    let p = session.printer;
    match args.command {
        ScriptsCommand::Upload {
            device,
            file,
            name,
            force,
        } => {
            let code = std::fs::read_to_string(&file)?;
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| CliError::Validation {
                        field: "file".into(),
                        reason: format!("{} has no file name", file.display()),
                    })?,
            };
            let upload = ScriptUpload {
                device,
                name,
                code,
                force,
            };
            let outcome: Value = session.call("script.upload", &upload, LIST).await?;
            p.value(&outcome)
        }
        ScriptsCommand::Delete { device, name } => {
            let deleted: ScriptDeleted = session
                .call("script.delete", &ScriptRef { device, name: name.clone() }, LIST)
                .await?;
            p.done(&format!("Deleted script {name} (id {})", deleted.id));
            Ok(())
        }
    }
}
