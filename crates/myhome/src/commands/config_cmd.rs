//! Config subcommand handlers.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;

const MASK: &str = "********";

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = global
        .config
        .clone()
        .unwrap_or_else(myhome_config::config_path);

    match args.command {
        ConfigCommand::Show => {
            let cfg = crate::load(global)?;
            let printer = crate::printer(global, &cfg)?;
            match printer.format {
                OutputFormat::Table | OutputFormat::Plain => {
                    print!("{}", cfg.to_masked_toml()?);
                    Ok(())
                }
                _ => {
                    let mut shown = cfg;
                    if shown.mqtt_password.is_some() {
                        shown.mqtt_password = Some(MASK.into());
                    }
                    printer.single(&shown, |_| String::new(), |_| String::new())
                }
            }
        }

        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }

        ConfigCommand::Init { force } => {
            myhome_config::init_config(&path, force)?;
            if !global.quiet {
                eprintln!("Wrote {}", path.display());
            }
            Ok(())
        }
    }
}
