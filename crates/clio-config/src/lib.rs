// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: Apache-2.0
mod schema;

pub use schema::{AgentConfig, Config, ModelConfig};

use std::path::PathBuf;

/// Root of the on-disk state tree (`.clio/`).
///
/// Resolution order: explicit `working_dir` from config, then the current
/// directory, then the home directory.  Sessions live under
/// `<root>/.clio/sessions/` and logs under `<root>/.clio/logs/`.
pub fn state_root(cfg: &Config) -> PathBuf {
    let base = cfg
        .working_dir
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));
    base.join(".clio")
}

/// Directory that holds all session state.
pub fn sessions_dir(cfg: &Config) -> PathBuf {
    state_root(cfg).join("sessions")
}

/// Directory that holds all log files.
pub fn logs_dir(cfg: &Config) -> PathBuf {
    state_root(cfg).join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_root_uses_explicit_working_dir() {
        let cfg = Config {
            working_dir: Some(PathBuf::from("/srv/project")),
            ..Config::default()
        };
        assert_eq!(state_root(&cfg), PathBuf::from("/srv/project/.clio"));
    }

    #[test]
    fn sessions_and_logs_are_siblings_under_root() {
        let cfg = Config {
            working_dir: Some(PathBuf::from("/srv/project")),
            ..Config::default()
        };
        assert_eq!(sessions_dir(&cfg), PathBuf::from("/srv/project/.clio/sessions"));
        assert_eq!(logs_dir(&cfg), PathBuf::from("/srv/project/.clio/logs"));
    }
}
