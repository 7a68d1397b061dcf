use std::path::PathBuf;

/// Process-level settings for the replay binary. Model settings live in
/// [`crate::kt::config::CoreConfig`].
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub dataset_path: Option<PathBuf>,
    /// Directory for the rolling log file; `None` keeps logs on stderr only.
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_parts(
            std::env::var("RUST_LOG").ok(),
            std::env::args().nth(1).or_else(|| std::env::var("KT_DATASET").ok()),
            std::env::var("ENABLE_FILE_LOGS").ok(),
            std::env::var("LOG_DIR").ok(),
        )
    }

    fn from_parts(
        log_level: Option<String>,
        dataset: Option<String>,
        file_logs: Option<String>,
        log_dir: Option<String>,
    ) -> Self {
        let file_logs = matches!(file_logs.as_deref(), Some("true" | "1"));
        Self {
            log_level: log_level.unwrap_or_else(|| "info".to_string()),
            dataset_path: dataset.filter(|p| !p.trim().is_empty()).map(PathBuf::from),
            log_dir: file_logs.then(|| {
                PathBuf::from(log_dir.unwrap_or_else(|| "./logs".to_string()))
            }),
        }
    }
}
