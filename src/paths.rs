//! Enlistment root normalization.
//!
//! Registry keys must be stable across the many ways a user can spell the
//! same directory: relative paths, `..` segments, symlinked parents, and
//! (on case-insensitive filesystems) letter case.

use std::{
   collections::VecDeque,
   ffi::OsString,
   fs, io,
   path::{Component, Path, PathBuf},
};

const MAX_SYMLINK_DEPTH: usize = 32;

/// Whether registry keys fold case on this platform.
pub const CASE_INSENSITIVE_FS: bool = cfg!(any(target_os = "macos", target_os = "windows"));

/// Resolves `path` to an absolute path with symlinks expanded.
///
/// Components that do not exist (a repo that was deleted, or one about to be
/// cloned) are kept lexically, so normalization never fails just because the
/// directory is gone.
pub fn normalize_enlistment_root(path: &Path) -> PathBuf {
   let absolute = if path.is_absolute() {
      path.to_path_buf()
   } else {
      std::env::current_dir()
         .map(|cwd| cwd.join(path))
         .unwrap_or_else(|_| path.to_path_buf())
   };

   match resolve_with_symlink_limit(&absolute) {
      Ok(resolved) => resolved,
      Err(e) => {
         tracing::warn!(
            path = %absolute.display(),
            "failed to resolve enlistment root, using lexical path: {e}"
         );
         lexical_clean(&absolute)
      },
   }
}

/// Key under which a normalized root is stored.
pub fn registry_key(normalized_root: &str) -> String {
   let trimmed = trim_trailing_separators(normalized_root);
   if CASE_INSENSITIVE_FS {
      trimmed.to_lowercase()
   } else {
      trimmed.to_string()
   }
}

/// Case-insensitive owner comparison used for session fan-out.
pub fn same_owner(a: &str, b: &str) -> bool {
   a.to_lowercase() == b.to_lowercase()
}

fn trim_trailing_separators(path: &str) -> &str {
   let trimmed = path.trim_end_matches(['/', '\\']);
   if trimmed.is_empty() { &path[..1.min(path.len())] } else { trimmed }
}

fn lexical_clean(path: &Path) -> PathBuf {
   let mut out = PathBuf::new();
   for component in path.components() {
      match component {
         Component::CurDir => {},
         Component::ParentDir => {
            out.pop();
         },
         other => out.push(other.as_os_str()),
      }
   }
   out
}

fn resolve_with_symlink_limit(path: &Path) -> io::Result<PathBuf> {
   let mut remaining = VecDeque::new();
   let mut current = PathBuf::new();

   for component in path.components() {
      match component {
         Component::Prefix(prefix) => {
            current = PathBuf::from(prefix.as_os_str());
         },
         Component::RootDir => {
            current.push(Component::RootDir.as_os_str());
         },
         Component::CurDir => {},
         Component::ParentDir => {
            remaining.push_back(OsString::from(".."));
         },
         Component::Normal(name) => {
            remaining.push_back(name.to_os_string());
         },
      }
   }

   let mut symlink_depth = 0usize;
   let mut missing = false;

   while let Some(part) = remaining.pop_front() {
      if part == "." {
         continue;
      }
      if part == ".." {
         current.pop();
         continue;
      }

      let candidate = current.join(&part);
      if missing {
         current = candidate;
         continue;
      }

      let meta = match fs::symlink_metadata(&candidate) {
         Ok(meta) => meta,
         Err(e) if e.kind() == io::ErrorKind::NotFound => {
            missing = true;
            current = candidate;
            continue;
         },
         Err(e) => return Err(e),
      };

      if meta.file_type().is_symlink() {
         symlink_depth += 1;
         if symlink_depth > MAX_SYMLINK_DEPTH {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "symlink depth limit exceeded"));
         }

         let target = fs::read_link(&candidate)?;
         if target.is_absolute() {
            current = PathBuf::new();
            for comp in target.components() {
               if matches!(comp, Component::Prefix(_) | Component::RootDir) {
                  current.push(comp.as_os_str());
               }
            }
         }
         for comp in components_to_vec(&target).into_iter().rev() {
            remaining.push_front(comp);
         }
         continue;
      }

      current = candidate;
   }

   Ok(current)
}

fn components_to_vec(path: &Path) -> Vec<OsString> {
   path
      .components()
      .filter_map(|component| match component {
         Component::Normal(name) => Some(name.to_os_string()),
         Component::CurDir => Some(OsString::from(".")),
         Component::ParentDir => Some(OsString::from("..")),
         Component::RootDir | Component::Prefix(_) => None,
      })
      .collect()
}

#[cfg(test)]
mod tests {
   use tempfile::TempDir;

   use super::*;

   #[test]
   fn normalizes_dot_segments() {
      let tmp = TempDir::new().unwrap();
      let real = tmp.path().canonicalize().unwrap();
      fs::create_dir_all(real.join("a/b")).unwrap();

      let messy = real.join("a/./b/../b");
      assert_eq!(normalize_enlistment_root(&messy), real.join("a/b"));
   }

   #[test]
   fn keeps_missing_tail_lexically() {
      let tmp = TempDir::new().unwrap();
      let real = tmp.path().canonicalize().unwrap();
      let missing = real.join("gone/../still-gone/repo");
      assert_eq!(normalize_enlistment_root(&missing), real.join("still-gone/repo"));
   }

   #[cfg(unix)]
   #[test]
   fn resolves_symlinked_parent() {
      let tmp = TempDir::new().unwrap();
      let real = tmp.path().canonicalize().unwrap();
      fs::create_dir_all(real.join("real/repo")).unwrap();
      std::os::unix::fs::symlink(real.join("real"), real.join("alias")).unwrap();

      assert_eq!(normalize_enlistment_root(&real.join("alias/repo")), real.join("real/repo"));
   }

   #[test]
   fn registry_key_ignores_trailing_separator() {
      assert_eq!(registry_key("/src/repo/"), registry_key("/src/repo"));
      assert_eq!(registry_key("/"), "/");
   }

   #[test]
   fn owner_comparison_is_case_insensitive() {
      assert!(same_owner("S-1-5-21-ABC", "s-1-5-21-abc"));
      assert!(!same_owner("501", "502"));
   }
}
