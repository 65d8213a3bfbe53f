//! Reload handling: one load cycle per refresh trigger, newest wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{error, info, warn};

use crate::config::ViewerConfig;
use crate::volume_loader::{LoadedVolume, RefreshTrigger, VolumeLoader, VolumeSource};

/// Monotonic load counter. Every load takes a ticket when it starts and
/// may only publish its result while that ticket is still the newest.
#[derive(Debug, Default)]
pub struct LoadGeneration(AtomicU64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoadTicket(u64);

impl LoadTicket {
    pub fn generation(self) -> u64 {
        self.0
    }
}

impl LoadGeneration {
    pub fn begin(&self) -> LoadTicket {
        LoadTicket(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: LoadTicket) -> bool {
        self.0.load(Ordering::SeqCst) == ticket.0
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the scene should show.
#[derive(Clone, Debug, Default)]
pub enum ViewerState {
    #[default]
    Idle,
    Loading {
        generation: u64,
        trigger: RefreshTrigger,
    },
    Failed {
        generation: u64,
        trigger: RefreshTrigger,
        message: String,
    },
    Ready {
        generation: u64,
        volume: Arc<LoadedVolume>,
    },
}

impl ViewerState {
    pub fn generation(&self) -> Option<u64> {
        match self {
            ViewerState::Idle => None,
            ViewerState::Loading { generation, .. }
            | ViewerState::Failed { generation, .. }
            | ViewerState::Ready { generation, .. } => Some(*generation),
        }
    }

    pub fn volume(&self) -> Option<&Arc<LoadedVolume>> {
        match self {
            ViewerState::Ready { volume, .. } => Some(volume),
            _ => None,
        }
    }

    /// Text for the host to show in place of the scene, if any.
    pub fn status_message(&self) -> Option<String> {
        match self {
            ViewerState::Loading { .. } => Some("Loading...".to_string()),
            ViewerState::Failed { message, .. } => Some(format!("Error: {message}")),
            ViewerState::Idle | ViewerState::Ready { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Ready,
    Failed,
    /// A newer refresh started while this one was in flight; its result was
    /// dropped.
    Superseded,
}

/// Owns the data source and the committed state for one viewer.
pub struct VolumeViewer<S> {
    source: S,
    config: ViewerConfig,
    generation: LoadGeneration,
    state: Mutex<ViewerState>,
}

impl<S: VolumeSource> VolumeViewer<S> {
    pub fn new(source: S, config: ViewerConfig) -> Self {
        Self {
            source,
            config,
            generation: LoadGeneration::default(),
            state: Mutex::new(ViewerState::Idle),
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn state(&self) -> ViewerState {
        self.lock_state().clone()
    }

    /// Discards the current scene data and loads it again for `trigger`.
    ///
    /// Safe to call while an earlier refresh is still pending: whichever
    /// refresh started last decides the final state, regardless of the order
    /// in which the fetches resolve.
    pub async fn refresh(&self, trigger: RefreshTrigger) -> RefreshOutcome {
        let ticket = self.generation.begin();
        {
            let mut state = self.lock_state();
            if self.generation.is_current(ticket) {
                *state = ViewerState::Loading {
                    generation: ticket.generation(),
                    trigger,
                };
            }
        }
        info!(
            "Refresh {:?} started (generation {})",
            trigger,
            ticket.generation()
        );

        let result = VolumeLoader::load(&self.source, trigger, &self.config).await;

        let mut state = self.lock_state();
        if !self.generation.is_current(ticket) {
            warn!(
                "Dropping result of superseded refresh {:?} (generation {}, current {})",
                trigger,
                ticket.generation(),
                self.generation.current()
            );
            return RefreshOutcome::Superseded;
        }
        match result {
            Ok(volume) => {
                *state = ViewerState::Ready {
                    generation: ticket.generation(),
                    volume: Arc::new(volume),
                };
                RefreshOutcome::Ready
            }
            Err(e) => {
                error!("Refresh {trigger:?} failed: {e}");
                *state = ViewerState::Failed {
                    generation: ticket.generation(),
                    trigger,
                    message: e.to_string(),
                };
                RefreshOutcome::Failed
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ViewerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_tickets_are_monotonic() {
        let generation = LoadGeneration::default();
        let first = generation.begin();
        let second = generation.begin();
        assert!(second > first);
        assert!(!generation.is_current(first));
        assert!(generation.is_current(second));
        assert_eq!(generation.current(), 2);
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(ViewerState::Idle.status_message(), None);
        let loading = ViewerState::Loading {
            generation: 1,
            trigger: RefreshTrigger(4),
        };
        assert_eq!(loading.status_message().as_deref(), Some("Loading..."));
        let failed = ViewerState::Failed {
            generation: 2,
            trigger: RefreshTrigger(4),
            message: "Mesh has no vertices".to_string(),
        };
        assert_eq!(
            failed.status_message().as_deref(),
            Some("Error: Mesh has no vertices")
        );
        assert_eq!(failed.generation(), Some(2));
    }
}
