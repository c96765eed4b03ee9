//! Logged-on user sessions.
//!
//! Session notifications arrive on whatever thread the host delivers them on
//! and are applied as messages; the task-queue consumer only ever reads a
//! snapshot.

use std::collections::HashSet;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserAndSession {
   pub user_id:    String,
   pub session_id: u32,
}

impl UserAndSession {
   pub fn new(user_id: impl Into<String>, session_id: u32) -> Self {
      Self { user_id: user_id.into(), session_id }
   }
}

/// A session notification from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
   Logon(UserAndSession),
   Logoff(UserAndSession),
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
   users:      RwLock<HashSet<UserAndSession>>,
   unattended: bool,
}

impl SessionRegistry {
   pub fn new(unattended: bool) -> Self {
      Self { users: RwLock::new(HashSet::new()), unattended }
   }

   pub fn register_active_user(&self, user_id: impl Into<String>, session_id: u32) {
      let entry = UserAndSession::new(user_id, session_id);
      tracing::info!(user_id = %entry.user_id, session_id, "registering active user");
      self.users.write().insert(entry);
   }

   /// Snapshot of every session seen so far, ordered for stable fan-out.
   pub fn active_users(&self) -> Vec<UserAndSession> {
      let mut users: Vec<_> = self.users.read().iter().cloned().collect();
      users.sort_by(|a, b| a.user_id.cmp(&b.user_id).then(a.session_id.cmp(&b.session_id)));
      users
   }

   pub fn handle_session_change(&self, change: SessionChange) {
      match change {
         SessionChange::Logon(session) => {
            if self.unattended {
               tracing::info!(
                  user_id = %session.user_id,
                  session_id = session.session_id,
                  "ignoring logon in unattended mode"
               );
               return;
            }
            self.register_active_user(session.user_id, session.session_id);
         },
         // Maintenance for a departed user fails harmlessly in the verb runner.
         SessionChange::Logoff(session) => {
            tracing::info!(
               user_id = %session.user_id,
               session_id = session.session_id,
               "session logoff"
            );
         },
      }
   }
}
