//! Session registry - at most one transcoder per session.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use relay_core::SessionId;
use tokio::sync::mpsc;
use tracing::warn;

use super::commands::RegistryError;
use crate::transcoder::{ExitNotice, ProcessHandle, TranscoderConfig};

/// Maximum number of concurrently running transcoders.
pub const MAX_SESSIONS: usize = 100;

/// Maps each session to its live transcoder.
///
/// Only the session manager task touches this map, which is what makes
/// get-or-create atomic without a lock.
pub struct SessionRegistry {
    config: TranscoderConfig,
    handles: HashMap<SessionId, ProcessHandle>,
    exits: mpsc::UnboundedSender<ExitNotice>,
    next_instance: u64,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Creates an empty registry.
    ///
    /// Every process it spawns reports its exit on `exits`.
    pub fn new(config: TranscoderConfig, exits: mpsc::UnboundedSender<ExitNotice>) -> Self {
        Self::with_capacity_limit(config, exits, MAX_SESSIONS)
    }

    pub fn with_capacity_limit(
        config: TranscoderConfig,
        exits: mpsc::UnboundedSender<ExitNotice>,
        max_sessions: usize,
    ) -> Self {
        Self {
            config,
            handles: HashMap::new(),
            exits,
            next_instance: 1,
            max_sessions,
        }
    }

    /// Returns the live handle for `session_id`, spawning one if needed.
    ///
    /// The second value is true when a new process was started.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryFull` if a new process would exceed the limit
    /// - `RegistryError::Transcoder` if the process could not be started;
    ///   nothing is recorded, so the next chunk tries again
    pub fn get_or_create(
        &mut self,
        session_id: &SessionId,
    ) -> Result<(&mut ProcessHandle, bool), RegistryError> {
        let live = self.handles.len();

        match self.handles.entry(session_id.clone()) {
            Entry::Occupied(entry) => Ok((entry.into_mut(), false)),
            Entry::Vacant(entry) => {
                if live >= self.max_sessions {
                    warn!(
                        session_id = %session_id,
                        current = live,
                        max = self.max_sessions,
                        "Session registry is full, not starting transcoder"
                    );
                    return Err(RegistryError::RegistryFull {
                        max: self.max_sessions,
                    });
                }

                let instance = self.next_instance;
                self.next_instance += 1;

                let handle = ProcessHandle::spawn(
                    &self.config,
                    session_id.clone(),
                    instance,
                    self.exits.clone(),
                )?;
                Ok((entry.insert(handle), true))
            }
        }
    }

    /// Removes and returns the handle for `session_id`.
    pub fn remove(&mut self, session_id: &SessionId) -> Option<ProcessHandle> {
        self.handles.remove(session_id)
    }

    /// Removes the handle only if it is the instance that exited.
    ///
    /// An exit notice can arrive after an explicit stop and a restart; the
    /// newer process must stay registered.
    pub fn remove_exited(&mut self, session_id: &SessionId, instance: u64) -> Option<ProcessHandle> {
        match self.handles.get(session_id) {
            Some(handle) if handle.instance() == instance => self.handles.remove(session_id),
            _ => None,
        }
    }

    /// Removes every handle.
    pub fn drain(&mut self) -> Vec<ProcessHandle> {
        self.handles.drain().map(|(_, handle)| handle).collect()
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&ProcessHandle> {
        self.handles.get(session_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessHandle> {
        self.handles.values()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
