use std::path::PathBuf;

pub struct AppContext {
    pub db_path: Option<PathBuf>,
    pub project: String,
}
