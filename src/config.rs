//! Configuration management for schedules, timeouts, and service paths.
//!
//! Loaded once at process start into a [`ServiceContext`] that is handed to
//! every component that needs it; nothing reads configuration through a
//! global.

use std::{
   env, fs,
   path::{Path, PathBuf},
   time::Duration,
};

use directories::BaseDirs;
use figment::{
   Figment,
   providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
   error::{ConfigError, Result},
   maintenance::MaintenanceTask,
};

pub const DEFAULT_SERVICE_NAME: &str = "maintd";
pub const UNATTENDED_ENV: &str = "MAINTD_UNATTENDED";
pub const HOME_ENV: &str = "MAINTD_HOME";

const MAX_REQUEST_BYTES_CAP: usize = 16 * 1024 * 1024;

/// Application configuration loaded from config file and environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
   pub service_name: String,

   pub fetch_due_secs:            u64,
   pub fetch_period_secs:         u64,
   pub loose_objects_due_secs:    u64,
   pub loose_objects_period_secs: u64,
   pub pack_files_due_secs:       u64,
   pub pack_files_period_secs:    u64,
   pub commit_graph_due_secs:     u64,
   pub commit_graph_period_secs:  u64,
   pub config_due_secs:           u64,
   pub config_period_secs:        u64,

   pub connect_timeout_ms:         u64,
   pub service_connect_timeout_ms: u64,
   pub rpc_timeout_ms:             u64,
   pub client_io_timeout_ms:       u64,
   pub mount_wait_timeout_ms:      u64,
   pub mount_poll_interval_ms:     u64,
   pub max_request_bytes:          usize,

   pub prune_missing_repos: bool,
   pub git_program:         String,
}

impl Default for Config {
   fn default() -> Self {
      Self {
         service_name: DEFAULT_SERVICE_NAME.to_string(),
         fetch_due_secs: 15 * 60,
         fetch_period_secs: 15 * 60,
         loose_objects_due_secs: 5 * 60,
         loose_objects_period_secs: 6 * 60 * 60,
         pack_files_due_secs: 30 * 60,
         pack_files_period_secs: 12 * 60 * 60,
         commit_graph_due_secs: 15 * 60,
         commit_graph_period_secs: 60 * 60,
         config_due_secs: 0,
         config_period_secs: 24 * 60 * 60,
         connect_timeout_ms: 500,
         service_connect_timeout_ms: 5000,
         rpc_timeout_ms: 30_000,
         client_io_timeout_ms: 10_000,
         mount_wait_timeout_ms: 60_000,
         mount_poll_interval_ms: 250,
         max_request_bytes: 1_048_576,
         prune_missing_repos: false,
         git_program: "git".to_string(),
      }
   }
}

/// Due time and period of one recurring maintenance timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
   pub task:         MaintenanceTask,
   pub due:          Duration,
   pub period:       Duration,
   pub ignore_pause: bool,
}

impl Config {
   /// Loads `<base>/config.toml` (writing defaults on first run) and layers
   /// `MAINTD_*` environment variables on top.
   pub fn load(base_dir: &Path) -> Self {
      let config_path = base_dir.join("config.toml");
      if !config_path.exists() {
         Self::create_default_config(&config_path);
      }

      Figment::from(Serialized::defaults(Self::default()))
         .merge(Toml::file(&config_path))
         .merge(Env::prefixed("MAINTD_").ignore(&["home", "unattended"]).lowercase(true))
         .extract()
         .inspect_err(|e| tracing::warn!("failed to parse config: {e}"))
         .unwrap_or_default()
   }

   fn create_default_config(path: &Path) {
      if let Some(parent) = path.parent() {
         let _ = fs::create_dir_all(parent);
      }
      if let Ok(toml) = toml::to_string_pretty(&Self::default()) {
         let _ = fs::write(path, toml);
      }
   }

   pub fn validate(&self) -> Result<()> {
      if self.service_name.is_empty()
         || !self
            .service_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
      {
         return Err(
            ConfigError::Invalid(format!("service_name '{}' is not a valid name", self.service_name))
               .into(),
         );
      }
      if self.max_request_bytes > MAX_REQUEST_BYTES_CAP {
         return Err(
            ConfigError::Invalid(format!(
               "max_request_bytes {} exceeds hard cap {}",
               self.max_request_bytes, MAX_REQUEST_BYTES_CAP
            ))
            .into(),
         );
      }
      for schedule in self.schedules() {
         if schedule.period.is_zero() {
            return Err(
               ConfigError::Invalid(format!("period for {} must be non-zero", schedule.task)).into(),
            );
         }
      }
      Ok(())
   }

   /// The recurring timers, in registration order.
   pub fn schedules(&self) -> Vec<Schedule> {
      let secs = Duration::from_secs;
      let schedule = |task: MaintenanceTask, due, period| Schedule {
         task,
         due: secs(due),
         period: secs(period),
         ignore_pause: !task.honors_pause(),
      };
      vec![
         schedule(MaintenanceTask::Fetch, self.fetch_due_secs, self.fetch_period_secs),
         schedule(
            MaintenanceTask::LooseObjects,
            self.loose_objects_due_secs,
            self.loose_objects_period_secs,
         ),
         schedule(MaintenanceTask::PackFiles, self.pack_files_due_secs, self.pack_files_period_secs),
         schedule(
            MaintenanceTask::CommitGraph,
            self.commit_graph_due_secs,
            self.commit_graph_period_secs,
         ),
         schedule(MaintenanceTask::Config, self.config_due_secs, self.config_period_secs),
      ]
   }

   pub fn rpc_timeout(&self) -> Duration {
      Duration::from_millis(self.rpc_timeout_ms)
   }

   pub fn client_io_timeout(&self) -> Duration {
      Duration::from_millis(self.client_io_timeout_ms)
   }

   pub fn mount_wait_timeout(&self) -> Duration {
      Duration::from_millis(self.mount_wait_timeout_ms)
   }

   pub fn mount_poll_interval(&self) -> Duration {
      Duration::from_millis(self.mount_poll_interval_ms.max(10))
   }
}

/// Filesystem locations used by the daemon and the CLI.
#[derive(Debug, Clone)]
pub struct Paths {
   pub base_dir:   PathBuf,
   pub data_dir:   PathBuf,
   pub socket_dir: PathBuf,
}

impl Paths {
   pub fn new(base_dir: PathBuf) -> Self {
      Self {
         data_dir: base_dir.join("data"),
         socket_dir: base_dir.join("sockets"),
         base_dir,
      }
   }

   pub fn ensure(&self) -> Result<()> {
      for dir in [&self.base_dir, &self.data_dir, &self.socket_dir] {
         fs::create_dir_all(dir)
            .map_err(|source| ConfigError::CreateDir { path: dir.clone(), source })?;
      }
      Ok(())
   }
}

/// Everything a component needs to know about its environment, built once
/// at process start.
#[derive(Debug, Clone)]
pub struct ServiceContext {
   pub config:     Config,
   pub paths:      Paths,
   pub unattended: bool,
   /// Set when this process was launched by the daemon itself.
   pub started_by_service: bool,
}

impl ServiceContext {
   /// Resolves the base directory, loads configuration, and reads the
   /// unattended flag from the environment.
   pub fn load() -> Result<Self> {
      let base_dir = resolve_base_dir()?;
      let config = Config::load(&base_dir);
      config.validate()?;
      Ok(Self {
         config,
         paths: Paths::new(base_dir),
         unattended: unattended_from_env(),
         started_by_service: false,
      })
   }

   /// Builds a context rooted at `base_dir` with an explicit config.
   pub fn with_config(base_dir: impl Into<PathBuf>, config: Config) -> Self {
      Self {
         config,
         paths: Paths::new(base_dir.into()),
         unattended: false,
         started_by_service: false,
      }
   }

   pub fn with_service_name(mut self, name: Option<String>) -> Self {
      if let Some(name) = name {
         self.config.service_name = name;
      }
      self
   }

   /// Connect timeout: longer when nobody is waiting at a terminal.
   pub fn connect_timeout(&self) -> Duration {
      if self.unattended || self.started_by_service {
         Duration::from_millis(self.config.service_connect_timeout_ms)
      } else {
         Duration::from_millis(self.config.connect_timeout_ms)
      }
   }
}

pub fn unattended_from_env() -> bool {
   env::var(UNATTENDED_ENV).is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn resolve_base_dir() -> Result<PathBuf> {
   if let Some(home) = env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
      return Ok(PathBuf::from(home));
   }
   BaseDirs::new()
      .map(|d| d.home_dir().join(".maintd"))
      .or_else(|| {
         env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".maintd"))
      })
      .ok_or_else(|| ConfigError::GetUserDirectories.into())
}
