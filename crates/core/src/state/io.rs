//! # Runtime Directory
//!
//! Location of the `.leadflow` runtime directory, which holds
//! the local database, `config.json` and an optional `.env`.

use std::path::PathBuf;

/// Get the runtime directory path (.leadflow)
pub fn get_runtime_path() -> PathBuf {
    if let Ok(path) = std::env::var("LEADFLOW_RUNTIME_PATH") {
        return PathBuf::from(path);
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".leadflow")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_runtime_path() {
        if std::env::var("LEADFLOW_RUNTIME_PATH").is_err() {
            assert!(get_runtime_path().ends_with(".leadflow"));
        }
    }
}
