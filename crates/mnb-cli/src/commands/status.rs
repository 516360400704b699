//! Status command handler

use std::path::Path;

use anyhow::Result;
use chrono::Utc;

use mnb_core::{Config, CursorRecord, FileCursorStore};

use crate::output::{human_age, Output, OutputFormat};

/// Show where things live and how far the bridge got
pub fn show(config: &Config, config_path: &Path, output: &Output) -> Result<()> {
    let store = FileCursorStore::new(config.cursor_path(), &config.matrix.user_id);
    let record = store.record();

    match output.format {
        OutputFormat::Json => {
            let cursor = match &record {
                Ok(record) => serde_json::to_value(record)?,
                Err(e) => serde_json::json!({"error": e.to_string()}),
            };
            let rooms: Vec<_> = config
                .rooms
                .iter()
                .map(|room| {
                    serde_json::json!({
                        "room": room.room,
                        "folder": room.folder,
                        "images": room.images,
                        "files": room.files
                    })
                })
                .collect();
            output.print_json(&serde_json::json!({
                "config_file": config_path,
                "data_dir": config.data_dir,
                "user_id": config.matrix.user_id,
                "cursor_file": store.path(),
                "cursor": cursor,
                "rooms": rooms
            }))?;
        }
        OutputFormat::Human => {
            println!("mnb Status");
            println!("==========");
            println!();
            println!("Config file: {}", config_path.display());
            println!("Data dir:    {}", config.data_dir.display());
            println!("Account:     {}", config.matrix.user_id);
            println!();
            println!("Cursor:");
            println!("  File:   {}", store.path().display());
            println!("  State:  {}", describe_cursor(&record, &config.matrix.user_id));
            println!();
            println!("Rooms ({}):", config.rooms.len());
            for room in &config.rooms {
                let mut kinds = Vec::new();
                if room.images {
                    kinds.push("images");
                }
                if room.files {
                    kinds.push("files");
                }
                let kinds = if kinds.is_empty() {
                    "nothing".to_string()
                } else {
                    kinds.join(", ")
                };
                println!("  {} -> {} ({})", room.room, room.folder, kinds);
            }
        }
    }

    Ok(())
}

fn describe_cursor(
    record: &Result<Option<CursorRecord>, mnb_core::CursorError>,
    user_id: &str,
) -> String {
    match record {
        Ok(None) => "none (next run is a cold start)".to_string(),
        Ok(Some(record)) if record.user_id != user_id => format!(
            "written for {}, will be ignored (next run is a cold start)",
            record.user_id
        ),
        Ok(Some(record)) => format!(
            "{} (saved {} ago)",
            record.next_batch,
            human_age(Utc::now() - record.updated_at)
        ),
        Err(e) => format!("unreadable: {}", e),
    }
}
