//! Group command handlers.

use serde_json::Value;
use tabled::Tabled;

use myhome_core::Group;
use myhome_core::rpc::params::{GroupId, GroupMember, NewGroup};

use crate::cli::{GroupsArgs, GroupsCommand};
use crate::error::CliError;
use crate::output::or_dash;

use super::{Session, util};

const LIST: &str = "groups list";

#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Members")]
    members: String,
}

impl From<&Group> for GroupRow {
    fn from(g: &Group) -> Self {
        Self {
            id: g.id.clone(),
            name: or_dash(&g.name),
            members: or_dash(&g.members.join(", ")),
        }
    }
}

fn detail(g: &Group) -> String {
    let mut lines = vec![
        format!("ID:      {}", g.id),
        format!("Name:    {}", or_dash(&g.name)),
        format!("Members: {}", g.members.len()),
    ];
    lines.extend(g.members.iter().map(|m| format!("  {m}")));
    lines.join("\n")
}

pub async fn handle(session: &Session, args: GroupsArgs) -> Result<(), CliError> {
    let p = session.printer;
    match args.command {
        GroupsCommand::List => {
            let groups: Vec<Group> = session.call("group.list", &Value::Null, LIST).await?;
            p.list(&groups, |g| GroupRow::from(g), |g| g.id.clone())
        }
        GroupsCommand::Show { group } => {
            let group: Group = session.call("group.show", &GroupId { group }, LIST).await?;
            p.single(&group, detail, |g| g.id.clone())
        }
        GroupsCommand::Create { id, name } => {
            let group: Group = session
                .call("group.create", &NewGroup { id, name }, LIST)
                .await?;
            p.single(&group, detail, |g| g.id.clone())
        }
        GroupsCommand::Delete { group } => {
            if !util::confirm(
                "delete a group",
                &format!("Delete group {group}?"),
                session.yes,
            )? {
                return Ok(());
            }
            let () = session
                .call("group.delete", &GroupId { group: group.clone() }, LIST)
                .await?;
            p.done(&format!("Deleted group {group}"));
            Ok(())
        }
        GroupsCommand::Add { group, device } => {
            let group: Group = session
                .call("group.add", &GroupMember { group, device }, LIST)
                .await?;
            p.single(&group, detail, |g| g.id.clone())
        }
        GroupsCommand::Remove { group, device } => {
            let group: Group = session
                .call("group.remove", &GroupMember { group, device }, LIST)
                .await?;
            p.single(&group, detail, |g| g.id.clone())
        }
    }
}
