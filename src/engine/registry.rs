// Named collection of supervisors with a single message channel for the caller to drain

use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use super::core::{JobState, ProgressRecord};
use super::supervisor::{ProcessSupervisor, SupervisorOptions, SupervisorStatus};

/// Message from a registered supervisor to the owner of the registry
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryMessage {
    /// Progress update during encoding
    Progress { name: String, record: ProgressRecord },

    /// State transition
    Status {
        name: String,
        state: JobState,
        message: String,
    },
}

impl RegistryMessage {
    pub fn name(&self) -> &str {
        match self {
            Self::Progress { name, .. } | Self::Status { name, .. } => name,
        }
    }
}

/// Adds and removes whole supervisors under one lock; never reaches into their state.
pub struct SupervisorRegistry {
    supervisors: Mutex<HashMap<String, Arc<ProcessSupervisor>>>,
    options: SupervisorOptions,
    tx: Sender<RegistryMessage>,
    rx: Receiver<RegistryMessage>,
}

impl Default for SupervisorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisorRegistry {
    pub fn new() -> Self {
        Self::with_options(SupervisorOptions::default())
    }

    /// Options applied to every supervisor this registry creates
    pub fn with_options(options: SupervisorOptions) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            supervisors: Mutex::new(HashMap::new()),
            options,
            tx,
            rx,
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<ProcessSupervisor>>> {
        self.supervisors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the receiver for supervisor messages
    pub fn receiver(&self) -> &Receiver<RegistryMessage> {
        &self.rx
    }

    /// Get the named supervisor, creating it if needed. Its notifications are forwarded to
    /// `receiver()` tagged with `name`.
    pub fn create(&self, name: &str) -> Arc<ProcessSupervisor> {
        let mut map = self.map();
        if let Some(existing) = map.get(name) {
            return existing.clone();
        }

        let supervisor = Arc::new(ProcessSupervisor::with_options(self.options));

        let tx = self.tx.clone();
        let tag = name.to_string();
        supervisor.on_progress(move |record| {
            let _ = tx.send(RegistryMessage::Progress {
                name: tag.clone(),
                record: record.clone(),
            });
        });

        let tx = self.tx.clone();
        let tag = name.to_string();
        supervisor.on_status(move |state, message| {
            let _ = tx.send(RegistryMessage::Status {
                name: tag.clone(),
                state,
                message: message.to_string(),
            });
        });

        debug!("registered supervisor '{}'", name);
        map.insert(name.to_string(), supervisor.clone());
        supervisor
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProcessSupervisor>> {
        self.map().get(name).cloned()
    }

    /// Unregister `name`, cancelling its job if one is running.
    pub fn remove(&self, name: &str) -> Option<Arc<ProcessSupervisor>> {
        let removed = self.map().remove(name);
        if let Some(supervisor) = &removed {
            if supervisor.state() == JobState::Running {
                info!("cancelling '{}' on removal", name);
                supervisor.cancel();
            }
        }
        removed
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.map().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    /// Snapshot of every registered supervisor, by name
    pub fn all_status(&self) -> BTreeMap<String, SupervisorStatus> {
        // Copy the handles out first; per-supervisor locks are taken without the map lock
        let entries: Vec<(String, Arc<ProcessSupervisor>)> = self
            .map()
            .iter()
            .map(|(name, sup)| (name.clone(), sup.clone()))
            .collect();

        entries
            .into_iter()
            .map(|(name, sup)| (name, sup.current_state()))
            .collect()
    }

    /// Number of supervisors currently in `Running`
    pub fn active_count(&self) -> usize {
        self.all_status()
            .values()
            .filter(|s| s.state == JobState::Running)
            .count()
    }

    /// Cancel every running job
    pub fn cancel_all(&self) {
        let supervisors: Vec<Arc<ProcessSupervisor>> = self.map().values().cloned().collect();
        for supervisor in supervisors {
            supervisor.cancel();
        }
    }
}
