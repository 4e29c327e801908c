//! Raw verb calls.

use serde_json::Value;

use crate::cli::RpcArgs;
use crate::error::CliError;

use super::{Session, util};

pub async fn handle(session: &Session, args: RpcArgs) -> Result<(), CliError> {
    let params = util::parse_params(args.params.as_deref())?.unwrap_or(Value::Null);
    let out: Value = session
        .call(&args.method, &params, "rpc server.methods")
        .await?;
    session.printer.value(&out)
}
