//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `opboard_core` linkage and report the crate version.
//! - With `--open`, load config from `OPBOARD_*` variables, open the
//!   configured database and report its schema version.

use log::info;
use opboard_core::db::migrations::{current_version, latest_version};
use opboard_core::{core_version, init_from_config, open_db, ping, CoreConfig};
use std::process::ExitCode;

fn main() -> ExitCode {
    println!("opboard_core ping={}", ping());
    println!("opboard_core version={}", core_version());

    if !std::env::args().skip(1).any(|arg| arg == "--open") {
        return ExitCode::SUCCESS;
    }
    match open_configured() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("opboard_cli error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn open_configured() -> Result<(), String> {
    let config = CoreConfig::from_env().map_err(|err| err.to_string())?;
    init_from_config(&config).map_err(|err| err.to_string())?;

    let conn = open_db(&config.db_path).map_err(|err| err.to_string())?;
    let version = current_version(&conn).map_err(|err| err.to_string())?;
    info!(
        "event=cli_probe module=cli status=ok schema_version={version} latest={}",
        latest_version()
    );
    println!("opboard_core db={}", config.db_path.display());
    println!("opboard_core schema_version={version}");
    Ok(())
}
