use super::GlobalArgs;
use crate::error::Result;
use crate::worker::report::{ErrorReport, StatusReport};

/// Episode counts per status.
pub fn status(global: &GlobalArgs, json: bool) -> Result<()> {
    let db = global.open_db()?;
    let report = StatusReport::generate(&db)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

/// Episodes with at least one recorded failure.
pub fn errors(global: &GlobalArgs, show_all: bool, json: bool) -> Result<()> {
    let db = global.open_db()?;
    let report = ErrorReport::generate(&db, show_all)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}
