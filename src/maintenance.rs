//! Maintenance task categories and their verb names.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One category of git upkeep. The verb names are a contract with the
/// `maintenance` subcommand that the daemon launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaintenanceTask {
   Config,
   Fetch,
   CommitGraph,
   LooseObjects,
   PackFiles,
   All,
}

impl MaintenanceTask {
   /// Execution order for `all`. Fetch precedes commit-graph so the graph
   /// covers freshly fetched commits.
   pub const ALL_ORDER: [Self; 5] =
      [Self::Config, Self::Fetch, Self::CommitGraph, Self::LooseObjects, Self::PackFiles];

   pub const fn verb_name(self) -> &'static str {
      match self {
         Self::Config => "config",
         Self::Fetch => "fetch",
         Self::CommitGraph => "commit-graph",
         Self::LooseObjects => "loose-objects",
         Self::PackFiles => "pack-files",
         Self::All => "all",
      }
   }

   /// Whether a maintenance pause holds this task back. Config upkeep is
   /// cheap and always runs.
   pub const fn honors_pause(self) -> bool {
      !matches!(self, Self::Config)
   }

   /// The concrete steps this task runs, in order.
   pub fn expand(self) -> Vec<Self> {
      match self {
         Self::All => Self::ALL_ORDER.to_vec(),
         task => vec![task],
      }
   }
}

impl fmt::Display for MaintenanceTask {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.verb_name())
   }
}

impl FromStr for MaintenanceTask {
   type Err = Error;

   fn from_str(s: &str) -> Result<Self, Self::Err> {
      match s.trim().to_ascii_lowercase().as_str() {
         "config" => Ok(Self::Config),
         "fetch" | "fetch-commits-and-trees" => Ok(Self::Fetch),
         "commit-graph" => Ok(Self::CommitGraph),
         "loose-objects" => Ok(Self::LooseObjects),
         "pack-files" => Ok(Self::PackFiles),
         "all" => Ok(Self::All),
         other => Err(Error::UnknownTask(other.to_string())),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn all_expands_in_dependency_order() {
      assert_eq!(MaintenanceTask::All.expand(), vec![
         MaintenanceTask::Config,
         MaintenanceTask::Fetch,
         MaintenanceTask::CommitGraph,
         MaintenanceTask::LooseObjects,
         MaintenanceTask::PackFiles,
      ]);
      assert_eq!(MaintenanceTask::PackFiles.expand(), vec![MaintenanceTask::PackFiles]);
   }

   #[test]
   fn parses_legacy_fetch_alias() {
      assert_eq!(
         "fetch-commits-and-trees".parse::<MaintenanceTask>().unwrap(),
         MaintenanceTask::Fetch
      );
      assert!("defrag".parse::<MaintenanceTask>().is_err());
   }

   #[test]
   fn verb_names_round_trip() {
      for task in MaintenanceTask::ALL_ORDER {
         assert_eq!(task.verb_name().parse::<MaintenanceTask>().unwrap(), task);
      }
   }
}
