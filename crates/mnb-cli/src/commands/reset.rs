//! Reset-cursor command handler

use anyhow::{Context, Result};

use mnb_core::{Config, CursorStore, FileCursorStore};

use crate::output::Output;

/// Delete the persisted cursor
pub fn reset_cursor(config: &Config, output: &Output) -> Result<()> {
    let mut store = FileCursorStore::new(config.cursor_path(), &config.matrix.user_id);

    if !store.path().exists() {
        output.message("No cursor saved; the next run already starts fresh.");
        return Ok(());
    }

    store
        .clear()
        .with_context(|| format!("Failed to remove {:?}", store.path()))?;
    output.success("Cursor removed; the next run starts from a fresh sync");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use mnb_core::Cursor;
    use tempfile::TempDir;

    fn config_in(temp_dir: &TempDir) -> Config {
        let toml = format!(
            r#"
data_dir = {:?}

[matrix]
homeserver = "https://matrix.example.org"
user_id = "@bot:example.org"
password = "secret"

[nextcloud]
server = "https://cloud.example.org"
user = "bot"
password = "secret"
"#,
            temp_dir.path().display().to_string()
        );
        Config::load_from_str(&toml).unwrap()
    }

    #[test]
    fn test_reset_removes_saved_cursor() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(&temp_dir);
        let mut store = FileCursorStore::new(config.cursor_path(), "@bot:example.org");
        store.save(&Cursor::new("s1")).unwrap();

        reset_cursor(&config, &Output::new(OutputFormat::Human)).unwrap();

        assert!(!config.cursor_path().exists());
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_reset_without_cursor_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_in(&temp_dir);

        reset_cursor(&config, &Output::new(OutputFormat::Json)).unwrap();
    }
}
