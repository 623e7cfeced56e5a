use crate::app::AppContext;
use crate::error::CliError;
use filtermate_engine::SubsetHistory;
use std::path::{Path, PathBuf};

pub const DEFAULT_DB_FILE: &str = "filtermate.sqlite";

pub fn resolve_db_path(context: &AppContext) -> Result<PathBuf, CliError> {
    if let Some(path) = &context.db_path {
        return Ok(path.clone());
    }

    let cwd =
        std::env::current_dir().map_err(|source| CliError::io("failed to read cwd", source))?;
    let candidate = cwd.join(DEFAULT_DB_FILE);
    if !candidate.is_file() {
        return Err(CliError::msg(format!(
            "no {DEFAULT_DB_FILE} in current directory; pass --db <path-to-history.sqlite>"
        )));
    }
    Ok(candidate)
}

pub fn open_history_at(path: &Path, project: &str) -> Result<SubsetHistory, CliError> {
    pollster::block_on(filtermate_sqlite::open_history(path, project)).map_err(|err| {
        CliError::msg(format!(
            "failed to open history database at {}: {}",
            path.display(),
            err
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::{open_history_at, resolve_db_path};
    use crate::app::AppContext;

    #[test]
    fn explicit_path_is_used_as_is() {
        let context = AppContext {
            db_path: Some("/data/history.sqlite".into()),
            project: "default".to_string(),
        };
        assert_eq!(
            resolve_db_path(&context).expect("explicit path"),
            std::path::PathBuf::from("/data/history.sqlite")
        );
    }

    #[test]
    fn opening_creates_the_history_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.sqlite");

        let history = open_history_at(&path, "default").expect("history should open");
        pollster::block_on(history.record("roads_layer", None, "\"id\" = 1"))
            .expect("record should succeed");

        let reopened = open_history_at(&path, "default").expect("history should reopen");
        let entries = pollster::block_on(reopened.entries("roads_layer")).expect("entries");
        assert_eq!(entries.len(), 1);
    }
}
