//! Status command for showing what the local store holds.

use std::io::Write;

use anyhow::Result;

use lr_db::Database;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, db: &Database, config: &Config) -> Result<()> {
    let stations = db.station_count()?;
    let listeners = db.listener_count()?;

    writeln!(writer, "Listener report status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;

    if stations == 0 {
        writeln!(writer, "No stations imported.")?;
        return Ok(());
    }

    writeln!(writer, "Stations: {stations}")?;
    writeln!(writer, "Listener rows: {listeners}")?;
    Ok(())
}
