//! Source Registry
//!
//! Tracks which media elements feed the chain. The host implements [`MediaTapper`] to
//! perform the actual connections; the registry decides when to call it and records the
//! outcome. Tap failures are never fatal: they are logged and surfaced through the
//! `blocked` flag and the last error.

use crate::chain::Head;
use crate::error::TapError;
use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};

/// Host handle for a media element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MediaElementId(pub u64);

/// Performs connections between media elements and the chain head.
pub trait MediaTapper: Send {
    fn connect(&mut self, element: MediaElementId, head: Head) -> Result<(), TapError>;
    fn disconnect(&mut self, element: MediaElementId, head: Head) -> Result<(), TapError>;
}

/// Document and playback notifications from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    /// A playable element entered the document.
    Inserted(MediaElementId),
    /// An element left the document.
    Removed(MediaElementId),
    /// Playback started; catches elements the insertion watcher missed.
    PlaybackStarted(MediaElementId),
}

pub struct SourceRegistry {
    tapper: Box<dyn MediaTapper>,
    taps: BTreeMap<MediaElementId, Head>,
    /// Elements whose tap failed; not retried until they leave the document.
    rejected: BTreeSet<MediaElementId>,
    blocked: bool,
    last_error: Option<TapError>,
}

impl SourceRegistry {
    pub fn new(tapper: Box<dyn MediaTapper>) -> Self {
        Self {
            tapper,
            taps: BTreeMap::new(),
            rejected: BTreeSet::new(),
            blocked: false,
            last_error: None,
        }
    }

    pub fn hooked_count(&self) -> usize {
        self.taps.len()
    }

    pub fn is_hooked(&self, element: MediaElementId) -> bool {
        self.taps.contains_key(&element)
    }

    /// Set when the only source the page offered could not be tapped.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    pub fn last_error(&self) -> Option<&TapError> {
        self.last_error.as_ref()
    }

    /// Taps `element` into `head`. Returns whether a new tap was made.
    pub fn hook(&mut self, element: MediaElementId, head: Head) -> bool {
        if self.taps.contains_key(&element) || self.rejected.contains(&element) {
            return false;
        }
        match self.tapper.connect(element, head) {
            Ok(()) => {
                self.taps.insert(element, head);
                self.refresh_blocked();
                info!("Hooked media element {:?} into {}", element, head);
                true
            }
            Err(e) => {
                warn!("Could not hook media element {:?}: {}", element, e);
                self.last_error = Some(e);
                self.rejected.insert(element);
                self.refresh_blocked();
                false
            }
        }
    }

    /// Detaches and forgets `element`. Detach errors are ignored.
    pub fn unhook(&mut self, element: MediaElementId) {
        self.rejected.remove(&element);
        if let Some(head) = self.taps.remove(&element) {
            if let Err(e) = self.tapper.disconnect(element, head) {
                debug!("Ignoring detach error for {:?}: {}", element, e);
            }
            info!("Unhooked media element {:?}", element);
        }
        self.refresh_blocked();
    }

    // Blocked while nothing is tapped and some element present in the page was refused.
    fn refresh_blocked(&mut self) {
        self.blocked = self.taps.is_empty() && !self.rejected.is_empty();
    }

    /// Moves every tap to `head`. Elements that cannot be reattached are dropped from
    /// tracking; the rest of the batch continues. Returns how many were reattached.
    pub fn rewire_all(&mut self, head: Head) -> usize {
        let elements: Vec<(MediaElementId, Head)> = self
            .taps
            .iter()
            .filter(|(_, h)| **h != head)
            .map(|(e, h)| (*e, *h))
            .collect();

        let mut rewired = 0;
        for (element, old) in elements {
            if let Err(e) = self.tapper.disconnect(element, old) {
                debug!("Ignoring detach error for {:?}: {}", element, e);
            }
            match self.tapper.connect(element, head) {
                Ok(()) => {
                    self.taps.insert(element, head);
                    rewired += 1;
                }
                Err(e) => {
                    warn!("Could not reattach {:?} to {}: {}", element, head, e);
                    self.taps.remove(&element);
                    self.rejected.insert(element);
                    self.last_error = Some(e);
                }
            }
        }
        self.refresh_blocked();
        if rewired > 0 {
            info!("Rewired {} media source(s) to {}", rewired, head);
        }
        rewired
    }

    /// Hooks every element already present at startup.
    pub fn scan(&mut self, elements: &[MediaElementId], head: Head) -> usize {
        elements.iter().filter(|e| self.hook(**e, head)).count()
    }

    pub fn handle_event(&mut self, event: MediaEvent, head: Head) {
        match event {
            MediaEvent::Inserted(e) | MediaEvent::PlaybackStarted(e) => {
                self.hook(e, head);
            }
            MediaEvent::Removed(e) => self.unhook(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Log {
        connects: Vec<(MediaElementId, Head)>,
        disconnects: Vec<(MediaElementId, Head)>,
    }

    struct Mock {
        log: Arc<Mutex<Log>>,
        refuse: BTreeSet<u64>,
    }

    impl MediaTapper for Mock {
        fn connect(&mut self, element: MediaElementId, head: Head) -> Result<(), TapError> {
            if self.refuse.contains(&element.0) {
                return Err(TapError::CrossOrigin);
            }
            self.log.lock().unwrap().connects.push((element, head));
            Ok(())
        }

        fn disconnect(&mut self, element: MediaElementId, head: Head) -> Result<(), TapError> {
            self.log.lock().unwrap().disconnects.push((element, head));
            Err(TapError::Detached)
        }
    }

    fn registry(refuse: &[u64]) -> (SourceRegistry, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let mock = Mock {
            log: log.clone(),
            refuse: refuse.iter().copied().collect(),
        };
        (SourceRegistry::new(Box::new(mock)), log)
    }

    #[test]
    fn test_hook_is_idempotent() {
        let (mut reg, log) = registry(&[]);
        assert!(reg.hook(MediaElementId(1), Head::Gain));
        assert!(!reg.hook(MediaElementId(1), Head::Gain));
        reg.handle_event(MediaEvent::PlaybackStarted(MediaElementId(1)), Head::Gain);
        assert_eq!(reg.hooked_count(), 1);
        assert_eq!(log.lock().unwrap().connects.len(), 1);
    }

    #[test]
    fn test_only_source_failing_sets_blocked() {
        let (mut reg, _) = registry(&[7]);
        assert!(!reg.hook(MediaElementId(7), Head::Gain));
        assert!(reg.is_blocked());
        assert_eq!(reg.last_error(), Some(&TapError::CrossOrigin));

        assert!(reg.hook(MediaElementId(8), Head::Gain));
        assert!(!reg.is_blocked());
    }

    #[test]
    fn test_removing_refused_source_clears_blocked() {
        let (mut reg, _) = registry(&[7]);
        reg.handle_event(MediaEvent::Inserted(MediaElementId(7)), Head::Gain);
        assert!(reg.is_blocked());

        reg.handle_event(MediaEvent::Removed(MediaElementId(7)), Head::Gain);
        assert!(!reg.is_blocked());
        assert_eq!(reg.hooked_count(), 0);
        // The last error stays for diagnostics.
        assert_eq!(reg.last_error(), Some(&TapError::CrossOrigin));
    }

    #[test]
    fn test_failure_with_other_sources_does_not_block() {
        let (mut reg, _) = registry(&[7]);
        reg.hook(MediaElementId(1), Head::Gain);
        reg.hook(MediaElementId(7), Head::Gain);
        assert!(!reg.is_blocked());
        assert!(reg.last_error().is_some());
    }

    #[test]
    fn test_unhook_swallows_detach_errors() {
        let (mut reg, log) = registry(&[]);
        reg.handle_event(MediaEvent::Inserted(MediaElementId(3)), Head::Gain);
        reg.handle_event(MediaEvent::Removed(MediaElementId(3)), Head::Gain);
        assert_eq!(reg.hooked_count(), 0);
        assert_eq!(log.lock().unwrap().disconnects, vec![(MediaElementId(3), Head::Gain)]);
    }

    #[test]
    fn test_rewire_moves_each_tap_once() {
        let (mut reg, log) = registry(&[]);
        assert_eq!(reg.scan(&[MediaElementId(1), MediaElementId(2)], Head::Gain), 2);
        assert_eq!(reg.rewire_all(Head::Spectral), 2);
        assert_eq!(reg.rewire_all(Head::Spectral), 0);

        let log = log.lock().unwrap();
        let to_spectral: Vec<_> = log
            .connects
            .iter()
            .filter(|(_, h)| *h == Head::Spectral)
            .collect();
        assert_eq!(to_spectral.len(), 2);
    }
}
