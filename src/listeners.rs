// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::error::{Error, Pool, Result};
use crate::ids::ListenerId;
use crate::math::Transform;
use crate::middleware::Middleware;
use crate::snapshot::TickSnapshot;

struct Listener {
    transform: Transform,
    /// Set when the transform changed since it was last pushed to the middleware.
    dirty: bool,
}

/// Largest listener pool the handle space can hold.
pub const MAX_LISTENER_POOL_SIZE: usize = u32::MAX as usize;

/// Pool of listener handles, separate from the object pool.
pub struct ListenerManager {
    listeners: BTreeMap<ListenerId, Listener>,
    free: Vec<ListenerId>,
    capacity: usize,
    override_listener: Option<ListenerId>,
}

impl ListenerManager {
    pub fn new(capacity: usize) -> ListenerManager {
        let capacity = if capacity > MAX_LISTENER_POOL_SIZE {
            warn!(
                requested = capacity,
                max = MAX_LISTENER_POOL_SIZE,
                "Listener pool too large, clamping"
            );
            MAX_LISTENER_POOL_SIZE
        } else {
            capacity
        };
        ListenerManager {
            listeners: BTreeMap::new(),
            free: (1..=capacity)
                .rev()
                .filter_map(|raw| u32::try_from(raw).ok())
                .map(ListenerId::from_raw)
                .collect(),
            capacity,
            override_listener: None,
        }
    }

    pub fn reserve<M: Middleware>(&mut self, middleware: &mut M) -> Result<ListenerId> {
        let id = self
            .free
            .pop()
            .ok_or(Error::PoolExhausted(Pool::Listeners))?;
        if let Err(e) = middleware.register_listener(id) {
            self.free.push(id);
            return Err(e.into());
        }

        debug!(listener = %id, "Listener reserved");
        self.listeners.insert(
            id,
            Listener {
                transform: Transform::identity(),
                dirty: false,
            },
        );
        Ok(id)
    }

    /// Releases a listener. Releasing the override listener unsets the override.
    pub fn release<M: Middleware>(&mut self, middleware: &mut M, id: ListenerId) -> Result<()> {
        if self.listeners.remove(&id).is_none() {
            return Err(Error::InvalidListener(id));
        }
        self.free.push(id);

        if self.override_listener == Some(id) {
            info!(listener = %id, "Override listener released, override unset");
            self.override_listener = None;
        }
        if let Err(e) = middleware.unregister_listener(id) {
            warn!(listener = %id, err = %e, "Middleware failed to unregister listener");
        }
        debug!(listener = %id, "Listener released");
        Ok(())
    }

    /// Designates the override listener, or unsets it.
    pub fn set_override(&mut self, id: Option<ListenerId>) -> Result<()> {
        if let Some(id) = id {
            if !self.listeners.contains_key(&id) {
                return Err(Error::InvalidListener(id));
            }
        }
        self.override_listener = id;
        Ok(())
    }

    pub fn override_listener(&self) -> Option<ListenerId> {
        self.override_listener
    }

    pub fn set_transform(&mut self, id: ListenerId, transform: Transform) -> Result<()> {
        let listener = self
            .listeners
            .get_mut(&id)
            .ok_or(Error::InvalidListener(id))?;
        if listener.transform != transform {
            listener.transform = transform;
            listener.dirty = true;
        }
        Ok(())
    }

    pub fn transform(&self, id: ListenerId) -> Result<&Transform> {
        self.listeners
            .get(&id)
            .map(|l| &l.transform)
            .ok_or(Error::InvalidListener(id))
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.listeners.contains_key(&id)
    }

    pub fn reserved(&self) -> usize {
        self.listeners.len()
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pushes changed transforms to the middleware.
    pub fn update<M: Middleware>(&mut self, middleware: &mut M) {
        for (id, listener) in self.listeners.iter_mut().filter(|(_, l)| l.dirty) {
            match middleware.set_listener_transform(*id, &listener.transform) {
                Ok(()) => listener.dirty = false,
                Err(e) => warn!(listener = %id, err = %e, "Unable to update listener transform"),
            }
        }
    }

    /// Captures the listener state for a tick.
    pub fn snapshot(&self, tick: u64, elapsed: std::time::Duration) -> TickSnapshot {
        TickSnapshot {
            tick,
            elapsed,
            listeners: self
                .listeners
                .iter()
                .map(|(id, l)| (*id, l.transform))
                .collect(),
            override_listener: self
                .override_listener
                .and_then(|id| self.listeners.get(&id).map(|l| (id, l.transform))),
        }
    }

    /// Unregisters every listener. Only used during shut down.
    pub fn release_all<M: Middleware>(&mut self, middleware: &mut M) {
        let ids: Vec<ListenerId> = self.listeners.keys().copied().collect();
        for id in ids {
            if let Err(e) = self.release(middleware, id) {
                warn!(listener = %id, err = %e, "Unable to release listener");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vec3;
    use crate::middleware::mock::{MockCall, MockMiddleware};

    #[test]
    fn test_pool_discipline() {
        let mut mock = MockMiddleware::new("mock");
        let mut listeners = ListenerManager::new(2);
        let a = listeners.reserve(&mut mock).unwrap();
        let b = listeners.reserve(&mut mock).unwrap();
        assert_ne!(a, b);
        assert_eq!(
            listeners.reserve(&mut mock).unwrap_err(),
            Error::PoolExhausted(Pool::Listeners)
        );

        listeners.release(&mut mock, a).unwrap();
        assert_eq!(
            listeners.release(&mut mock, a).unwrap_err(),
            Error::InvalidListener(a)
        );
        listeners.release(&mut mock, b).unwrap();
        assert_eq!(listeners.available(), listeners.capacity());
    }

    #[test]
    fn test_releasing_override_unsets_it() {
        let mut mock = MockMiddleware::new("mock");
        let mut listeners = ListenerManager::new(4);
        let a = listeners.reserve(&mut mock).unwrap();
        let b = listeners.reserve(&mut mock).unwrap();

        listeners.set_override(Some(a)).unwrap();
        assert_eq!(listeners.override_listener(), Some(a));

        listeners.release(&mut mock, a).unwrap();
        assert_eq!(listeners.override_listener(), None);
        assert!(listeners.contains(b));
        assert!(listeners.snapshot(1, Default::default()).override_listener.is_none());
    }

    #[test]
    fn test_override_requires_reserved_listener() {
        let mut listeners = ListenerManager::new(1);
        let unknown = ListenerId::from_raw(1);
        assert_eq!(
            listeners.set_override(Some(unknown)).unwrap_err(),
            Error::InvalidListener(unknown)
        );
        listeners.set_override(None).unwrap();
    }

    #[test]
    fn test_transforms_are_forwarded_when_changed() {
        let mut mock = MockMiddleware::new("mock");
        let handle = mock.handle();
        let mut listeners = ListenerManager::new(1);
        let id = listeners.reserve(&mut mock).unwrap();

        let transform = Transform::from_position(Vec3::new(1.0, 2.0, 3.0));
        listeners.set_transform(id, transform).unwrap();
        listeners.update(&mut mock);
        listeners.set_transform(id, transform).unwrap();
        listeners.update(&mut mock);

        assert_eq!(
            handle.count_calls(|c| *c == MockCall::SetListenerTransform(id)),
            1
        );
        let snapshot = listeners.snapshot(7, Default::default());
        assert_eq!(snapshot.tick, 7);
        assert_eq!(snapshot.listeners, vec![(id, transform)]);
    }
}
