use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::apply::ExecutorSettings;
use crate::discovery::DiscoveryPolicy;
use crate::error::ConfigError;

pub const CONFIG_ENV: &str = "STRATUS_CONFIG";
const CONFIG_DIR_NAME: &str = "stratus";
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Runtime settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory holding every deployment's artifacts.
    pub artifact_root: PathBuf,
    /// Bootstrap template; the built-in worker template when unset.
    pub bootstrap_template: Option<PathBuf>,
    /// Certificate exposed to the template as `master_pem`.
    pub master_cert: Option<PathBuf>,
    /// Credential file (`resource: [{type, auth_data}]`).
    pub auth_data_file: Option<PathBuf>,
    /// Service-account file copied next to graphs that need it.
    pub gce_auth_file: Option<PathBuf>,
    /// Label of the execution context running the apply backend.
    pub execution_label: String,
    /// Backend working directory; the artifact root when unset.
    pub terraform_workdir: Option<PathBuf>,
    pub lock_poll_interval_secs: u64,
    pub update_lock_timeout_secs: u64,
    pub destroy_lock_timeout_secs: u64,
    pub discovery_attempts: u32,
    pub discovery_backoff_secs: u64,
    pub dry_run: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from("artifacts"),
            bootstrap_template: None,
            master_cert: None,
            auth_data_file: None,
            gce_auth_file: None,
            execution_label: "terraform".to_string(),
            terraform_workdir: None,
            lock_poll_interval_secs: 5,
            update_lock_timeout_secs: 300,
            destroy_lock_timeout_secs: 600,
            discovery_attempts: 5,
            discovery_backoff_secs: 5,
            dry_run: false,
        }
    }
}

impl Settings {
    /// Resolve settings from, in order: `explicit`, `STRATUS_CONFIG`,
    /// `<config dir>/stratus/config.yaml`, built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the selected file cannot be read or parsed.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::resolve_from(
            explicit,
            std::env::var_os(CONFIG_ENV),
            dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)),
        )
    }

    /// [`Settings::resolve`] with the environment and user config path
    /// passed in. An explicit or environment path must exist; the user
    /// config file is optional.
    ///
    /// # Errors
    ///
    /// Returns an error when the selected file cannot be read or parsed.
    pub fn resolve_from(
        explicit: Option<&Path>,
        env_path: Option<OsString>,
        user_config: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = env_path.filter(|path| !path.is_empty()) {
            return Self::load(Path::new(&path));
        }
        if let Some(path) = user_config.filter(|path| path.is_file()) {
            return Self::load(&path);
        }
        debug!("no config file found; using defaults");
        Ok(Self::default())
    }

    /// Load one config file. Relative paths inside it resolve against the
    /// file's directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = if source.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&source).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };
        debug!(path = %path.display(), "loaded config");

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(settings.relative_to(base))
    }

    fn relative_to(mut self, base: &Path) -> Self {
        let anchor = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        anchor(&mut self.artifact_root);
        for path in [
            &mut self.bootstrap_template,
            &mut self.master_cert,
            &mut self.auth_data_file,
            &mut self.gce_auth_file,
            &mut self.terraform_workdir,
        ]
        .into_iter()
        .flatten()
        {
            anchor(path);
        }
        self
    }

    #[must_use]
    pub fn workdir(&self) -> &Path {
        self.terraform_workdir
            .as_deref()
            .unwrap_or(&self.artifact_root)
    }

    /// Lock budgets converted from seconds into poll attempts.
    #[must_use]
    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            poll_interval: Duration::from_secs(self.lock_poll_interval_secs),
            update_lock_attempts: lock_attempts(
                self.update_lock_timeout_secs,
                self.lock_poll_interval_secs,
            ),
            destroy_lock_attempts: lock_attempts(
                self.destroy_lock_timeout_secs,
                self.lock_poll_interval_secs,
            ),
        }
    }

    #[must_use]
    pub const fn discovery_policy(&self) -> DiscoveryPolicy {
        DiscoveryPolicy {
            attempts: self.discovery_attempts,
            backoff: Duration::from_secs(self.discovery_backoff_secs),
        }
    }
}

/// A zero interval counts the budget in attempts directly.
fn lock_attempts(budget_secs: u64, interval_secs: u64) -> u32 {
    let attempts = budget_secs.checked_div(interval_secs).unwrap_or(budget_secs);
    u32::try_from(attempts).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::ffi::OsString;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    use super::Settings;
    use crate::error::ConfigError;

    #[test]
    fn defaults_match_documented_budgets() {
        let settings = Settings::default();
        let executor = settings.executor_settings();
        assert_eq!(executor.poll_interval, Duration::from_secs(5));
        assert_eq!(executor.update_lock_attempts, 60);
        assert_eq!(executor.destroy_lock_attempts, 120);
        assert_eq!(settings.discovery_policy().attempts, 5);
        assert_eq!(settings.workdir(), settings.artifact_root.as_path());
    }

    #[test]
    fn explicit_path_wins_and_resolves_relative_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.yaml");
        fs::write(
            &path,
            "artifact_root: out\nauth_data_file: /etc/stratus/auth.yaml\ndiscovery_attempts: 1\n",
        )
        .expect("write");

        let settings = Settings::resolve_from(
            Some(&path),
            Some(OsString::from("/does/not/exist.yaml")),
            None,
        )
        .expect("resolve");
        assert_eq!(settings.artifact_root, temp.path().join("out"));
        assert_eq!(
            settings.auth_data_file,
            Some(PathBuf::from("/etc/stratus/auth.yaml"))
        );
        assert_eq!(settings.discovery_attempts, 1);
        assert_eq!(settings.execution_label, "terraform");
    }

    #[test]
    fn environment_path_is_used_without_explicit_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("env.yaml");
        fs::write(&path, "execution_label: tofu\n").expect("write");

        let settings = Settings::resolve_from(None, Some(path.into_os_string()), None)
            .expect("resolve");
        assert_eq!(settings.execution_label, "tofu");
    }

    #[test]
    fn missing_user_config_falls_back_to_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings =
            Settings::resolve_from(None, None, Some(temp.path().join("missing.yaml")))
                .expect("resolve");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.yaml");
        fs::write(&path, "artifact_rot: typo\n").expect("write");
        assert!(matches!(
            Settings::load(&path).expect_err("must fail"),
            ConfigError::Parse { .. }
        ));
    }

    #[test]
    fn zero_poll_interval_counts_attempts() {
        let settings = Settings {
            lock_poll_interval_secs: 0,
            update_lock_timeout_secs: 3,
            ..Settings::default()
        };
        assert_eq!(settings.executor_settings().update_lock_attempts, 3);
    }
}
