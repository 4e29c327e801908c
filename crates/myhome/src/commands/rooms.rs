//! Room command handlers.

use serde_json::Value;
use tabled::Tabled;

use myhome_core::Room;
use myhome_core::rpc::params::RoomId;

use crate::cli::{RoomsArgs, RoomsCommand};
use crate::error::CliError;
use crate::output::or_dash;

use super::{Session, util};

const LIST: &str = "rooms list";

#[derive(Tabled)]
struct RoomRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
}

impl From<&Room> for RoomRow {
    fn from(r: &Room) -> Self {
        Self {
            id: r.id.clone(),
            name: or_dash(&r.name),
        }
    }
}

pub async fn handle(session: &Session, args: RoomsArgs) -> Result<(), CliError> {
    let p = session.printer;
    match args.command {
        RoomsCommand::List => {
            let rooms: Vec<Room> = session.call("room.list", &Value::Null, LIST).await?;
            p.list(&rooms, |r| RoomRow::from(r), |r| r.id.clone())
        }
        RoomsCommand::Create { id, name } => {
            let room: Room = session.call("room.create", &Room { id, name }, LIST).await?;
            p.done(&format!("Created room {}", room.id));
            Ok(())
        }
        RoomsCommand::Delete { room } => {
            if !util::confirm(
                "delete a room",
                &format!("Delete room {room}? Its devices keep running but lose the room."),
                session.yes,
            )? {
                return Ok(());
            }
            let () = session
                .call("room.delete", &RoomId { room: room.clone() }, LIST)
                .await?;
            p.done(&format!("Deleted room {room}"));
            Ok(())
        }
    }
}
