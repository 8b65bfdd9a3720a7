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
use std::fmt;

use tracing::debug;

use crate::ids::OwnerId;
use crate::request::{Notification, RequestKind};

pub type Callback = Box<dyn Fn(&Notification) + Send>;

/// Selects the notifications a listener receives. Unset fields match everything.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RequestFilter {
    pub kind: Option<RequestKind>,
    pub owner: Option<OwnerId>,
}

impl RequestFilter {
    pub fn all() -> RequestFilter {
        RequestFilter::default()
    }

    pub fn with_kind(mut self, kind: RequestKind) -> RequestFilter {
        self.kind = Some(kind);
        self
    }

    pub fn with_owner(mut self, owner: OwnerId) -> RequestFilter {
        self.owner = Some(owner);
        self
    }

    fn matches(&self, notification: &Notification) -> bool {
        self.kind.map_or(true, |kind| kind == notification.kind())
            && self
                .owner
                .map_or(true, |owner| notification.owner() == Some(owner))
    }
}

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

impl fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request listener:{}", self.0)
    }
}

/// A listener travelling to the audio thread inside a request.
pub struct NewRequestListener {
    filter: RequestFilter,
    callback: Callback,
}

impl NewRequestListener {
    pub fn new(filter: RequestFilter, callback: Callback) -> NewRequestListener {
        NewRequestListener { filter, callback }
    }

    pub fn filter(&self) -> RequestFilter {
        self.filter
    }

    /// Takes the callback out, leaving one that ignores everything.
    pub(crate) fn take_callback(&mut self) -> Callback {
        std::mem::replace(&mut self.callback, Box::new(|_| {}))
    }
}

impl fmt::Debug for NewRequestListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewRequestListener")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

struct RequestListener {
    handle: ListenerHandle,
    filter: RequestFilter,
    callback: Callback,
}

/// Delivers notifications to registered callbacks, on the audio thread, in registration order.
#[derive(Default)]
pub struct RequestListenerManager {
    listeners: Vec<RequestListener>,
    next_handle: u64,
}

impl RequestListenerManager {
    pub fn new() -> RequestListenerManager {
        RequestListenerManager::default()
    }

    pub fn add(&mut self, filter: RequestFilter, callback: Callback) -> ListenerHandle {
        self.next_handle += 1;
        let handle = ListenerHandle(self.next_handle);
        self.listeners.push(RequestListener {
            handle,
            filter,
            callback,
        });
        handle
    }

    /// Returns false if the handle wasn't registered.
    pub fn remove(&mut self, handle: ListenerHandle) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.handle != handle);
        before != self.listeners.len()
    }

    pub fn notify(&self, notification: &Notification) {
        for listener in self.listeners.iter() {
            if listener.filter.matches(notification) {
                (listener.callback)(notification);
            }
        }
        debug!(notification = ?notification, "Notification delivered");
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::ids::{ObjectId, PreloadId};
    use crate::request::RequestOutcome;

    fn recorder() -> (Arc<Mutex<Vec<Notification>>>, Callback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let callback: Callback = {
            let seen = seen.clone();
            Box::new(move |n: &Notification| seen.lock().push(n.clone()))
        };
        (seen, callback)
    }

    #[test]
    fn test_filters() {
        let mut manager = RequestListenerManager::new();
        let (everything, callback) = recorder();
        manager.add(RequestFilter::all(), callback);
        let (objects, callback) = recorder();
        manager.add(RequestFilter::all().with_kind(RequestKind::Object), callback);
        let (owned, callback) = recorder();
        manager.add(RequestFilter::all().with_owner(OwnerId(7)), callback);

        manager.notify(&Notification::RequestCompleted {
            kind: RequestKind::Object,
            owner: Some(OwnerId(7)),
            result: Ok(RequestOutcome::Done),
        });
        manager.notify(&Notification::RequestCompleted {
            kind: RequestKind::Manager,
            owner: None,
            result: Ok(RequestOutcome::ObjectReserved(ObjectId::from_raw(2))),
        });
        manager.notify(&Notification::PreloadLoaded {
            preload: PreloadId::from_name("Level"),
        });

        assert_eq!(everything.lock().len(), 3);
        assert_eq!(objects.lock().len(), 1);
        assert_eq!(owned.lock().len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut manager = RequestListenerManager::new();
        let (seen, callback) = recorder();
        let handle = manager.add(RequestFilter::all(), callback);
        assert!(manager.remove(handle));
        assert!(!manager.remove(handle));
        assert!(manager.is_empty());

        manager.notify(&Notification::ObjectReleasable {
            object: ObjectId::from_raw(2),
        });
        assert!(seen.lock().is_empty());
    }
}
