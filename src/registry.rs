//! Persistent registry of enlistments and the maintenance fan-out over them.
//!
//! The file is a version line followed by one JSON registration per line.
//! Writes go through a temp sibling and an atomic rename. Corrupt or unknown
//! content reads as empty (or partial) and is logged; a file that cannot be
//! read at all fails mutations instead of being overwritten.

use std::{
   collections::BTreeMap,
   fs::{self, File, OpenOptions},
   io::Write,
   path::{Component, Path, PathBuf},
   sync::Arc,
};

use chrono::{DateTime, TimeZone, Utc};
use fs4::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
   Result,
   config::ServiceContext,
   error::RegistryError,
   maintenance::MaintenanceTask,
   paths::{normalize_enlistment_root, registry_key, same_owner},
   util::{fail_point, fsync_dir},
   verb::VerbRunner,
};

pub const REGISTRY_VERSION: u32 = 2;
pub const REGISTRY_FILE: &str = "repo-registry";
pub const PAUSE_FILE: &str = "maintenance-pause.time";

/// One registered enlistment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRegistration {
   #[serde(rename = "EnlistmentRoot")]
   pub enlistment_root: String,
   #[serde(rename = "OwnerSID")]
   pub owner_sid:       String,
   #[serde(rename = "IsActive")]
   pub is_active:       bool,
}

impl RepoRegistration {
   pub fn new(enlistment_root: impl Into<String>, owner_sid: impl Into<String>) -> Self {
      Self { enlistment_root: enlistment_root.into(), owner_sid: owner_sid.into(), is_active: true }
   }
}

/// Outcome of one maintenance fan-out for a user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceSummary {
   pub repos_for_user: usize,
   pub maintained:     usize,
   pub failures:       usize,
   pub skipped:        usize,
   pub removed:        usize,
   pub paused:         bool,
   pub stopped:        bool,
}

type Entries = BTreeMap<String, RepoRegistration>;

pub struct RepoRegistry {
   registry_path:       PathBuf,
   tmp_path:            PathBuf,
   lock_path:           PathBuf,
   pause_path:          PathBuf,
   runner:              Arc<dyn VerbRunner>,
   prune_missing_repos: bool,
   lock:                Mutex<()>,
}

impl RepoRegistry {
   pub fn new(ctx: &ServiceContext, runner: Arc<dyn VerbRunner>) -> Self {
      let data_dir = &ctx.paths.data_dir;
      Self {
         registry_path: data_dir.join(REGISTRY_FILE),
         tmp_path: data_dir.join(format!("{REGISTRY_FILE}.tmp")),
         lock_path: data_dir.join(format!("{REGISTRY_FILE}.lock")),
         pause_path: data_dir.join(PAUSE_FILE),
         runner,
         prune_missing_repos: ctx.config.prune_missing_repos,
         lock: Mutex::new(()),
      }
   }

   pub fn registry_path(&self) -> &Path {
      &self.registry_path
   }

   /// Registers `root` for `owner` and marks it active. Re-registering an
   /// existing root takes the new owner. The file is rewritten only when
   /// something changed.
   pub fn try_register_repo(&self, root: &str, owner: &str) -> Result<()> {
      let normalized = normalize_root(root);
      let key = registry_key(&normalized);

      let _guard = self.lock.lock();
      let _file_lock = self.lock_file()?;
      let mut entries = self.load_entries()?;

      match entries.get_mut(&key) {
         Some(existing) if existing.is_active && existing.owner_sid == owner => {
            tracing::debug!(root = %normalized, "repo already registered");
            return Ok(());
         },
         Some(existing) => {
            if existing.owner_sid != owner {
               tracing::info!(
                  root = %normalized,
                  previous_owner = %existing.owner_sid,
                  owner,
                  "changing repo owner"
               );
            }
            existing.owner_sid = owner.to_string();
            existing.is_active = true;
         },
         None => {
            entries.insert(key, RepoRegistration::new(normalized.clone(), owner));
         },
      }

      self.write_entries(&entries)?;
      tracing::info!(root = %normalized, owner, "registered repo");
      Ok(())
   }

   /// Clears the active flag. Errors without touching the file when the
   /// repo is unknown.
   pub fn try_deactivate_repo(&self, root: &str) -> Result<()> {
      let normalized = normalize_root(root);
      let key = registry_key(&normalized);

      let _guard = self.lock.lock();
      let _file_lock = self.lock_file()?;
      let mut entries = self.load_entries()?;

      let Some(entry) = entries.get_mut(&key) else {
         return Err(RegistryError::DeactivateMissing(normalized).into());
      };
      if !entry.is_active {
         return Ok(());
      }
      entry.is_active = false;
      self.write_entries(&entries)?;
      tracing::info!(root = %normalized, "deactivated repo");
      Ok(())
   }

   pub fn try_remove_repo(&self, root: &str) -> Result<()> {
      let normalized = normalize_root(root);
      let key = registry_key(&normalized);

      let _guard = self.lock.lock();
      let _file_lock = self.lock_file()?;
      let mut entries = self.load_entries()?;

      if entries.remove(&key).is_none() {
         return Err(RegistryError::RemoveMissing(normalized).into());
      }
      self.write_entries(&entries)?;
      tracing::info!(root = %normalized, "removed repo");
      Ok(())
   }

   pub fn try_get_active_repos(&self) -> Result<Vec<RepoRegistration>> {
      let _guard = self.lock.lock();
      Ok(self.read_entries().into_values().filter(|r| r.is_active).collect())
   }

   /// Looks up one registration by root, active or not.
   pub fn get_repo(&self, root: &str) -> Option<RepoRegistration> {
      let key = registry_key(&normalize_root(root));
      let _guard = self.lock.lock();
      self.read_entries().remove(&key)
   }

   /// Every registration, keyed by normalized root.
   pub fn read_registry(&self) -> BTreeMap<String, RepoRegistration> {
      let _guard = self.lock.lock();
      self.read_entries()
   }

   /// Runs `task` for every active repo owned by `user_id`, one at a time.
   ///
   /// A failing repo is logged and the next one is attempted. `stop` is
   /// checked between repos; a running verb is allowed to finish.
   pub fn run_maintenance_task_for_repos(
      &self,
      task: MaintenanceTask,
      user_id: &str,
      session_id: u32,
      stop: &CancellationToken,
   ) -> MaintenanceSummary {
      let mut summary = MaintenanceSummary::default();

      if task.honors_pause()
         && let Some(until) = self.maintenance_paused_until()
      {
         tracing::info!(%task, user_id, paused_until = %until, "maintenance paused, skipping");
         summary.paused = true;
         return summary;
      }

      let repos: Vec<RepoRegistration> = {
         let _guard = self.lock.lock();
         self
            .read_entries()
            .into_values()
            .filter(|r| r.is_active && same_owner(&r.owner_sid, user_id))
            .collect()
      };
      summary.repos_for_user = repos.len();

      if repos.is_empty() {
         tracing::info!(%task, user_id, session_id, "no active repos for user");
         return summary;
      }

      for repo in repos {
         if stop.is_cancelled() {
            tracing::info!(%task, user_id, "maintenance stopped before remaining repos");
            summary.stopped = true;
            break;
         }

         let root = Path::new(&repo.enlistment_root);
         if self.prune_missing_repos && !volume_root(root).exists() {
            tracing::info!(
               %task,
               root = %repo.enlistment_root,
               "volume for repo is not available, skipping"
            );
            summary.skipped += 1;
            continue;
         }

         tracing::info!(%task, root = %repo.enlistment_root, session_id, "calling maintenance verb");
         if self.runner.call_maintenance(task, root, session_id) {
            summary.maintained += 1;
            continue;
         }

         summary.failures += 1;
         tracing::warn!(%task, root = %repo.enlistment_root, "maintenance verb failed");
         // A vanished repo stays registered unless pruning is enabled.
         if self.prune_missing_repos && !root.exists() {
            match self.try_remove_repo(&repo.enlistment_root) {
               Ok(()) => {
                  tracing::info!(root = %repo.enlistment_root, "pruned missing repo");
                  summary.removed += 1;
               },
               Err(e) => tracing::warn!(root = %repo.enlistment_root, "failed to prune repo: {e}"),
            }
         }
      }

      summary
   }

   /// Logs every registration. Never mutates.
   pub fn trace_status(&self) {
      let entries = self.read_registry();
      tracing::info!(count = entries.len(), path = %self.registry_path.display(), "repo registry status");
      for repo in entries.values() {
         tracing::info!(
            root = %repo.enlistment_root,
            owner = %repo.owner_sid,
            active = repo.is_active,
            "registered repo"
         );
      }
   }

   pub fn try_pause_maintenance_until(&self, until: DateTime<Utc>) -> Result<()> {
      let _guard = self.lock.lock();
      let tmp = self.pause_path.with_extension("time.tmp");
      write_synced(&tmp, until.timestamp().to_string().as_bytes())
         .and_then(|()| fs::rename(&tmp, &self.pause_path))
         .map_err(RegistryError::Pause)?;
      if let Some(parent) = self.pause_path.parent() {
         fsync_dir(parent).map_err(RegistryError::Pause)?;
      }
      tracing::info!(until = %until, "maintenance paused");
      Ok(())
   }

   pub fn try_remove_pause(&self) -> Result<()> {
      let _guard = self.lock.lock();
      match fs::remove_file(&self.pause_path) {
         Ok(()) => {
            tracing::info!("maintenance resumed");
            Ok(())
         },
         Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
         Err(e) => Err(RegistryError::Pause(e).into()),
      }
   }

   /// The pause deadline if one is in effect. An expired or unreadable pause
   /// file is removed.
   pub fn maintenance_paused_until(&self) -> Option<DateTime<Utc>> {
      if !self.pause_path.exists() {
         return None;
      }
      match read_pause_file(&self.pause_path) {
         Some(until) if until > Utc::now() => Some(until),
         _ => {
            tracing::info!(path = %self.pause_path.display(), "removing expired maintenance pause");
            if let Err(e) = fs::remove_file(&self.pause_path)
               && e.kind() != std::io::ErrorKind::NotFound
            {
               tracing::warn!(path = %self.pause_path.display(), "failed to remove pause file: {e}");
            }
            None
         },
      }
   }

   fn lock_file(&self) -> Result<RegistryFileLock> {
      RegistryFileLock::acquire(&self.lock_path)
   }

   /// Read path for callers that only look: an unreadable file reads as
   /// empty.
   fn read_entries(&self) -> Entries {
      self.load_entries().unwrap_or_else(|e| {
         tracing::warn!("{e}, treating registry as empty");
         Entries::new()
      })
   }

   /// Read path for mutations. Only a missing file reads as empty.
   fn load_entries(&self) -> Result<Entries, RegistryError> {
      match fs::read(&self.registry_path) {
         Ok(raw) => Ok(parse_registry(&raw)),
         Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
         Err(source) => Err(RegistryError::Read { path: self.registry_path.clone(), source }),
      }
   }

   fn write_entries(&self, entries: &Entries) -> Result<()> {
      let mut out = format!("{REGISTRY_VERSION}\n");
      for entry in entries.values() {
         out.push_str(&serde_json::to_string(entry)?);
         out.push('\n');
      }

      let persist = |source| RegistryError::Persist { path: self.registry_path.clone(), source };
      if let Some(parent) = self.registry_path.parent() {
         fs::create_dir_all(parent).map_err(persist)?;
      }
      write_synced(&self.tmp_path, out.as_bytes()).map_err(persist)?;
      fail_point("registry.before_rename").map_err(persist)?;
      fs::rename(&self.tmp_path, &self.registry_path).map_err(persist)?;
      if let Some(parent) = self.registry_path.parent() {
         fsync_dir(parent).map_err(persist)?;
      }
      Ok(())
   }
}

/// The pause deadline recorded under `ctx`, without cleaning up an expired
/// one.
pub fn pause_deadline(ctx: &ServiceContext) -> Option<DateTime<Utc>> {
   read_pause_file(&ctx.paths.data_dir.join(PAUSE_FILE)).filter(|until| *until > Utc::now())
}

fn read_pause_file(path: &Path) -> Option<DateTime<Utc>> {
   let raw = fs::read_to_string(path).ok()?;
   raw
      .trim()
      .parse::<i64>()
      .ok()
      .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

/// Parses registry file contents. Unknown versions read as empty and bad
/// lines (invalid UTF-8 or JSON) are skipped; stored roots are re-normalized.
pub fn parse_registry(raw: &[u8]) -> BTreeMap<String, RepoRegistration> {
   let mut entries = Entries::new();
   let mut lines = raw.split(|b| *b == b'\n');

   let version_line = lines
      .next()
      .and_then(|line| std::str::from_utf8(line).ok())
      .unwrap_or("<invalid utf-8>")
      .trim();
   match version_line.parse::<u32>() {
      Ok(version) if version <= REGISTRY_VERSION => {},
      _ => {
         if !version_line.is_empty() {
            tracing::warn!(
               on_disk_version = version_line,
               expected_version = REGISTRY_VERSION,
               "unsupported registry version, treating registry as empty"
            );
         }
         return entries;
      },
   }

   for (index, line) in lines.enumerate() {
      let Ok(line) = std::str::from_utf8(line) else {
         tracing::warn!(line = index + 2, "skipping registry entry that is not valid UTF-8");
         continue;
      };
      let line = line.trim();
      if line.is_empty() {
         continue;
      }
      let mut registration: RepoRegistration = match serde_json::from_str(line) {
         Ok(registration) => registration,
         Err(e) => {
            tracing::warn!(line = index + 2, "skipping unparseable registry entry: {e}");
            continue;
         },
      };

      let normalized = normalize_root(&registration.enlistment_root);
      if normalized != registration.enlistment_root {
         tracing::info!(
            stored = %registration.enlistment_root,
            normalized = %normalized,
            "mapping registered root to normalized path"
         );
         registration.enlistment_root = normalized;
      }
      entries.insert(registry_key(&registration.enlistment_root), registration);
   }

   entries
}

fn normalize_root(root: &str) -> String {
   normalize_enlistment_root(Path::new(root))
      .to_string_lossy()
      .into_owned()
}

/// The mount point a repo lives on, as far as it can be told from the path.
fn volume_root(path: &Path) -> PathBuf {
   let mut components = path.components();
   let mut root = PathBuf::new();
   for component in components.by_ref() {
      root.push(component.as_os_str());
      if matches!(component, Component::RootDir) {
         break;
      }
   }
   if cfg!(target_os = "macos") {
      let rest: Vec<_> = components.take(2).collect();
      if let [Component::Normal(first), Component::Normal(name)] = rest.as_slice()
         && *first == "Volumes"
      {
         root.push(first);
         root.push(name);
      }
   }
   root
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
   let mut file = File::create(path)?;
   file.write_all(data)?;
   file.sync_all()
}

struct RegistryFileLock {
   file: File,
}

impl RegistryFileLock {
   fn acquire(path: &Path) -> Result<Self> {
      let lock_err = |source| RegistryError::Lock { path: path.to_path_buf(), source };
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent).map_err(lock_err)?;
      }
      let file = OpenOptions::new()
         .create(true)
         .read(true)
         .write(true)
         .truncate(false)
         .open(path)
         .map_err(lock_err)?;
      FileExt::lock_exclusive(&file).map_err(lock_err)?;
      Ok(Self { file })
   }
}

impl Drop for RegistryFileLock {
   fn drop(&mut self) {
      let _ = FileExt::unlock(&self.file);
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn unknown_version_reads_empty() {
      let raw = "3\n{\"EnlistmentRoot\":\"/r\",\"OwnerSID\":\"u\",\"IsActive\":true}\n";
      assert!(parse_registry(raw.as_bytes()).is_empty());
      assert!(parse_registry(b"garbage\n").is_empty());
      assert!(parse_registry(b"").is_empty());
   }

   #[test]
   fn bad_lines_are_skipped() {
      let raw = "2\n{not json}\n\n{\"EnlistmentRoot\":\"/nonexistent/r\",\"OwnerSID\":\"u\",\"IsActive\":false}\n";
      let entries = parse_registry(raw.as_bytes());
      assert_eq!(entries.len(), 1);
      let entry = entries.values().next().unwrap();
      assert_eq!(entry.owner_sid, "u");
      assert!(!entry.is_active);
   }

   #[test]
   fn invalid_utf8_line_is_skipped() {
      let mut raw = b"2\n{\"EnlistmentRoot\":\"/nonexistent/good\",\"OwnerSID\":\"u\",\"IsActive\":true}\n".to_vec();
      raw.extend_from_slice(b"{\"EnlistmentRoot\":\"/x\xff\",\"OwnerSID\":\"u\",\"IsActive\":true}\n");
      let entries = parse_registry(&raw);
      assert_eq!(entries.len(), 1);
      assert!(entries.values().all(|r| r.enlistment_root.ends_with("good")));
   }

   #[test]
   fn older_version_is_accepted() {
      let raw = "1\n{\"EnlistmentRoot\":\"/nonexistent/r\",\"OwnerSID\":\"u\",\"IsActive\":true}\n";
      assert_eq!(parse_registry(raw.as_bytes()).len(), 1);
   }

   #[test]
   fn serializes_with_wire_key_names() {
      let json = serde_json::to_string(&RepoRegistration::new("/r", "501")).unwrap();
      assert_eq!(json, r#"{"EnlistmentRoot":"/r","OwnerSID":"501","IsActive":true}"#);
   }

   #[cfg(unix)]
   #[test]
   fn volume_root_of_plain_path_is_filesystem_root() {
      assert_eq!(volume_root(Path::new("/home/u/src/repo")), PathBuf::from("/"));
   }
}
