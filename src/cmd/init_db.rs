//! Schema bootstrap command — `cla-assistant init-db`.

use std::path::Path;

use anyhow::{Context, Result};

use cla_assistant::cla::db::ClaDb;

pub fn cmd_init_db(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    ClaDb::new(db_path)?;
    println!("CLA database initialized at {}", db_path.display());
    Ok(())
}
