//! Device registry: the hub connection's arena of device sessions.
//!
//! Sessions are stored in creation order, so a session's [`DeviceId`] is its
//! index. A name index maps device names to ids. Entries are never removed
//! individually; [`DeviceRegistry::clear`] drops all of them at once.

use std::collections::HashMap;
use std::time::Duration;

use crate::device::DeviceSession;
use crate::protocol::device::DeviceInfo;

/// Ordinal id of a device session, assigned in creation order from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub usize);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    sessions: Vec<DeviceSession>,
    by_name: HashMap<String, DeviceId>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the session for `info.name`, creating it if the name is new.
    ///
    /// Returns the id and whether a session was created.
    pub fn get_or_create(&mut self, info: &DeviceInfo, grab_interval: Duration) -> (DeviceId, bool) {
        if let Some(id) = self.by_name.get(&info.name) {
            return (*id, false);
        }
        let id = DeviceId(self.sessions.len());
        self.sessions
            .push(DeviceSession::new(id, info.clone(), grab_interval));
        self.by_name.insert(info.name.clone(), id);
        tracing::debug!(device = %info.name, %id, "Device session created");
        (id, true)
    }

    #[must_use]
    pub fn get(&self, id: DeviceId) -> Option<&DeviceSession> {
        self.sessions.get(id.0)
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut DeviceSession> {
        self.sessions.get_mut(id.0)
    }

    #[must_use]
    pub fn find(&self, name: &str) -> Option<DeviceId> {
        self.by_name.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Sessions in id order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceSession> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DeviceSession> {
        self.sessions.iter_mut()
    }

    /// All ids in creation order.
    pub fn ids(&self) -> impl Iterator<Item = DeviceId> + use<> {
        (0..self.sessions.len()).map(DeviceId)
    }

    /// Drop every session. Ids restart from 0.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.by_name.clear();
    }
}
