//! Configuration loading: JSON file + CLI overrides.

use std::path::Path;
use tracing::info;
use wsrelay_core::{ConfigFile, IndexedEndpoint, RelayConfig, RelayError, RelayResult, SettingsOverrides};

/// Read the optional config file, then apply per-index and scalar CLI
/// overrides. A file that is named but unreadable or invalid is an error.
pub fn load(
    config_path: Option<&Path>,
    cli_bind: &[IndexedEndpoint],
    cli_listen: &[IndexedEndpoint],
    overrides: SettingsOverrides,
) -> RelayResult<RelayConfig> {
    let file = match config_path {
        Some(path) => {
            info!(path = %path.display(), "loading config file");
            let content = std::fs::read_to_string(path).map_err(|e| {
                RelayError::Config(format!("cannot read {}: {e}", path.display()))
            })?;
            Some(ConfigFile::from_json(&content)?)
        }
        None => None,
    };

    RelayConfig::resolve(file, cli_bind, cli_listen, overrides)
}

/// Log the resolved configuration.
pub fn log_summary(config: &RelayConfig) {
    info!(
        buffer = config.settings.buffer_size,
        idle_timeout_secs = config.settings.idle_timeout.as_secs(),
        route_header = %config.settings.route_header,
        "relay configuration"
    );
    for (index, binding) in config.bindings.iter().enumerate() {
        info!(index, bind = %binding, target = %config.target_for(index), "binding");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use wsrelay_core::{Binding, Target};

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("wsrelay-{}-{name}", std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_file_with_cli_overrides() {
        let path = write_temp(
            "ok.json",
            r#"{
                "bindings": [{"address": "0.0.0.0", "port": 80}],
                "listenings": [{"host": "127.0.0.1", "port": 22}],
                "buffer": 8192,
                "timeout": 30
            }"#,
        );
        let cfg = load(
            Some(&path),
            &["1:0.0.0.0:8080".parse().unwrap()],
            &["1:127.0.0.1:143".parse().unwrap()],
            SettingsOverrides::default(),
        )
        .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(
            cfg.bindings,
            vec![Binding::new("0.0.0.0", 80), Binding::new("0.0.0.0", 8080)]
        );
        assert_eq!(
            cfg.targets,
            vec![Target::new("127.0.0.1", 22), Target::new("127.0.0.1", 143)]
        );
        assert_eq!(cfg.settings.buffer_size, 8192);
        assert_eq!(cfg.settings.idle_timeout, Duration::from_secs(30));
    }

    #[test]
    fn missing_file_is_error() {
        let path = std::env::temp_dir().join("wsrelay-definitely-missing.json");
        let err = load(Some(&path), &[], &[], SettingsOverrides::default()).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn invalid_json_is_error() {
        let path = write_temp("bad.json", "{ bindings: ");
        let err = load(Some(&path), &[], &[], SettingsOverrides::default()).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, RelayError::Json(_)));
    }

    #[test]
    fn no_file_and_no_bindings_is_error() {
        assert!(load(None, &[], &[], SettingsOverrides::default()).is_err());
    }
}
