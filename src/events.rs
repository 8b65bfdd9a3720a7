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
//! The event manager: every in-flight event instance, keyed by object, trigger activation and
//! implementation entry.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::time::Duration;

use tracing::debug;

use crate::ids::{EventKey, ObjectId, OwnerId, SourceId, TriggerId, TriggerInstanceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    /// Waiting for a deferred start.
    Pending { remaining: Duration },
    Playing,
    /// A stop was requested and has not been confirmed yet.
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventInstance {
    trigger: TriggerId,
    owner: Option<OwnerId>,
    state: EventState,
    /// The audio input the event streams from.
    source: Option<SourceId>,
}

impl EventInstance {
    pub fn trigger(&self) -> TriggerId {
        self.trigger
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.owner
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    pub fn source(&self) -> Option<SourceId> {
        self.source
    }
}

/// Describes an event instance that has just been removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finished {
    pub key: EventKey,
    pub trigger: TriggerId,
    pub owner: Option<OwnerId>,
    /// No other event of the same activation is left.
    pub activation_finished: bool,
    /// No other event on the same object is left.
    pub object_drained: bool,
}

/// The result of a stop: events to forward to the middleware and pending events that were
/// cancelled without ever starting.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Stop {
    pub stopping: Vec<EventKey>,
    pub cancelled: Vec<Finished>,
}

#[derive(Default)]
pub struct EventManager {
    events: BTreeMap<EventKey, EventInstance>,
}

impl EventManager {
    pub fn new() -> EventManager {
        EventManager::default()
    }

    /// Adds an event the middleware has already started.
    pub fn add_playing(&mut self, key: EventKey, trigger: TriggerId, owner: Option<OwnerId>) {
        self.insert(key, trigger, owner, EventState::Playing);
    }

    /// Adds an event that starts once `delay` has elapsed.
    pub fn add_pending(
        &mut self,
        key: EventKey,
        trigger: TriggerId,
        owner: Option<OwnerId>,
        delay: Duration,
    ) {
        self.insert(
            key,
            trigger,
            owner,
            EventState::Pending { remaining: delay },
        );
    }

    fn insert(
        &mut self,
        key: EventKey,
        trigger: TriggerId,
        owner: Option<OwnerId>,
        state: EventState,
    ) {
        debug!(event = %key, trigger = %trigger, state = ?state, "Event added");
        self.events.insert(
            key,
            EventInstance {
                trigger,
                owner,
                state,
                source: None,
            },
        );
    }

    /// Binds an event to the input source it plays from.
    pub fn set_source(&mut self, key: EventKey, source: SourceId) {
        if let Some(event) = self.events.get_mut(&key) {
            event.source = Some(source);
        }
    }

    pub fn get(&self, key: EventKey) -> Option<&EventInstance> {
        self.events.get(&key)
    }

    /// Marks a deferred event as started.
    pub fn mark_playing(&mut self, key: EventKey) {
        if let Some(event) = self.events.get_mut(&key) {
            event.state = EventState::Playing;
        }
    }

    /// Removes an event that finished or was stopped. Unknown keys are ignored, since a
    /// completion may race with a stop.
    pub fn report_finished(&mut self, key: EventKey) -> Option<Finished> {
        let event = self.events.remove(&key)?;
        Some(Finished {
            key,
            trigger: event.trigger,
            owner: event.owner,
            activation_finished: self
                .events
                .range(activation_range(key.object, key.instance))
                .next()
                .is_none(),
            object_drained: self.live_count(key.object) == 0,
        })
    }

    /// Stops every event of the trigger on the object.
    pub fn stop_trigger(&mut self, object: ObjectId, trigger: TriggerId) -> Stop {
        self.stop_where(object, |event| event.trigger == trigger)
    }

    /// Stops every event on the object, or only those of the given owner.
    pub fn stop_all(&mut self, object: ObjectId, owner: Option<OwnerId>) -> Stop {
        self.stop_where(object, |event| owner.is_none() || event.owner == owner)
    }

    fn stop_where(&mut self, object: ObjectId, matches: impl Fn(&EventInstance) -> bool) -> Stop {
        let mut stop = Stop::default();
        let mut cancelled = Vec::new();
        for (key, event) in self.events.range_mut(object_range(object)) {
            if !matches(&*event) {
                continue;
            }
            match event.state {
                EventState::Pending { .. } => cancelled.push(*key),
                EventState::Playing => {
                    event.state = EventState::Stopping;
                    stop.stopping.push(*key);
                }
                // Already on its way out.
                EventState::Stopping => {}
            }
        }
        stop.cancelled = cancelled
            .into_iter()
            .filter_map(|key| self.report_finished(key))
            .collect();
        stop
    }

    /// Marks every playing event as stopping and returns all of them, then cancels every
    /// pending event. Used by shut down and by stop-all-sounds.
    pub fn stop_everything(&mut self) -> Stop {
        let objects: Vec<ObjectId> = {
            let mut objects: Vec<ObjectId> = self.events.keys().map(|k| k.object).collect();
            objects.dedup();
            objects
        };
        let mut stop = Stop::default();
        for object in objects {
            let Stop {
                stopping,
                cancelled,
            } = self.stop_all(object, None);
            stop.stopping.extend(stopping);
            stop.cancelled.extend(cancelled);
        }
        stop
    }

    /// Advances deferred starts. Returns the events that are due, which stay pending until
    /// [`EventManager::mark_playing`] or [`EventManager::report_finished`] is called.
    pub fn update(&mut self, elapsed: Duration) -> Vec<(EventKey, TriggerId)> {
        let mut due = Vec::new();
        for (key, event) in self.events.iter_mut() {
            if let EventState::Pending { remaining } = &mut event.state {
                *remaining = remaining.saturating_sub(elapsed);
                if remaining.is_zero() {
                    due.push((*key, event.trigger));
                }
            }
        }
        due
    }

    /// Number of live events on the object, in any state.
    pub fn live_count(&self, object: ObjectId) -> usize {
        self.events.range(object_range(object)).count()
    }

    pub fn events_for(&self, object: ObjectId) -> impl Iterator<Item = (&EventKey, &EventInstance)> {
        self.events.range(object_range(object))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Forgets every event. Only used during shut down, once stops have been issued.
    pub fn release(&mut self) {
        if !self.events.is_empty() {
            debug!(events = self.events.len(), "Dropping remaining events");
        }
        self.events.clear();
    }
}

fn object_range(object: ObjectId) -> RangeInclusive<EventKey> {
    EventKey {
        object,
        instance: TriggerInstanceId::from_raw(0),
        entry: 0,
    }..=EventKey {
        object,
        instance: TriggerInstanceId::from_raw(u64::MAX),
        entry: u16::MAX,
    }
}

fn activation_range(object: ObjectId, instance: TriggerInstanceId) -> RangeInclusive<EventKey> {
    EventKey {
        object,
        instance,
        entry: 0,
    }..=EventKey {
        object,
        instance,
        entry: u16::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(object: u32, instance: u64, entry: u16) -> EventKey {
        EventKey {
            object: ObjectId::from_raw(object),
            instance: TriggerInstanceId::from_raw(instance),
            entry,
        }
    }

    #[test]
    fn test_activations_are_independent() {
        let trigger = TriggerId::from_name("Explosion");
        let mut events = EventManager::new();
        events.add_playing(key(2, 1, 0), trigger, None);
        events.add_playing(key(2, 1, 1), trigger, None);
        events.add_playing(key(2, 2, 0), trigger, None);
        assert_eq!(events.live_count(ObjectId::from_raw(2)), 3);

        let first = events.report_finished(key(2, 1, 0)).unwrap();
        assert!(!first.activation_finished);
        assert!(!first.object_drained);

        let second = events.report_finished(key(2, 1, 1)).unwrap();
        assert!(second.activation_finished);
        assert!(!second.object_drained);

        let last = events.report_finished(key(2, 2, 0)).unwrap();
        assert!(last.activation_finished);
        assert!(last.object_drained);
    }

    #[test]
    fn test_unknown_completion_is_ignored() {
        let mut events = EventManager::new();
        assert!(events.report_finished(key(2, 1, 0)).is_none());
    }

    #[test]
    fn test_stop_trigger_only_touches_that_trigger() {
        let explosion = TriggerId::from_name("Explosion");
        let music = TriggerId::from_name("Music");
        let mut events = EventManager::new();
        events.add_playing(key(2, 1, 0), explosion, None);
        events.add_playing(key(2, 2, 0), music, None);
        events.add_playing(key(3, 3, 0), explosion, None);

        let stop = events.stop_trigger(ObjectId::from_raw(2), explosion);
        assert_eq!(stop.stopping, vec![key(2, 1, 0)]);
        assert!(stop.cancelled.is_empty());
        assert_eq!(
            events.get(key(2, 1, 0)).unwrap().state(),
            EventState::Stopping
        );
        assert_eq!(events.get(key(2, 2, 0)).unwrap().state(), EventState::Playing);
        assert_eq!(events.get(key(3, 3, 0)).unwrap().state(), EventState::Playing);

        // A second stop doesn't return the event again.
        assert!(events
            .stop_trigger(ObjectId::from_raw(2), explosion)
            .stopping
            .is_empty());
    }

    #[test]
    fn test_stop_all_by_owner() {
        let trigger = TriggerId::from_name("Footstep");
        let mut events = EventManager::new();
        events.add_playing(key(2, 1, 0), trigger, Some(OwnerId(1)));
        events.add_playing(key(2, 2, 0), trigger, Some(OwnerId(2)));

        let stop = events.stop_all(ObjectId::from_raw(2), Some(OwnerId(2)));
        assert_eq!(stop.stopping, vec![key(2, 2, 0)]);

        let stop = events.stop_all(ObjectId::from_raw(2), None);
        assert_eq!(stop.stopping, vec![key(2, 1, 0)]);
    }

    #[test]
    fn test_pending_events_are_cancelled_silently() {
        let trigger = TriggerId::from_name("Delayed");
        let mut events = EventManager::new();
        events.add_pending(key(2, 1, 0), trigger, None, Duration::from_millis(50));

        let stop = events.stop_all(ObjectId::from_raw(2), None);
        assert!(stop.stopping.is_empty());
        assert_eq!(stop.cancelled.len(), 1);
        assert!(stop.cancelled[0].activation_finished);
        assert!(stop.cancelled[0].object_drained);
        assert!(events.is_empty());
    }

    #[test]
    fn test_deferred_starts() {
        let trigger = TriggerId::from_name("Delayed");
        let mut events = EventManager::new();
        events.add_pending(key(2, 1, 0), trigger, None, Duration::from_millis(25));

        assert!(events.update(Duration::from_millis(10)).is_empty());
        assert!(events.update(Duration::from_millis(10)).is_empty());
        assert_eq!(
            events.update(Duration::from_millis(10)),
            vec![(key(2, 1, 0), trigger)]
        );

        events.mark_playing(key(2, 1, 0));
        assert!(events.update(Duration::from_millis(10)).is_empty());
        assert_eq!(events.get(key(2, 1, 0)).unwrap().state(), EventState::Playing);
    }

    #[test]
    fn test_source_binding() {
        let trigger = TriggerId::from_name("Voice");
        let mut events = EventManager::new();
        events.add_pending(key(2, 1, 0), trigger, None, Duration::from_millis(10));
        assert_eq!(events.get(key(2, 1, 0)).unwrap().source(), None);

        events.set_source(key(2, 1, 0), SourceId::from_raw(3));
        events.set_source(key(2, 9, 0), SourceId::from_raw(3));
        assert_eq!(
            events.get(key(2, 1, 0)).unwrap().source(),
            Some(SourceId::from_raw(3))
        );
        assert!(events.get(key(2, 9, 0)).is_none());
    }

    #[test]
    fn test_stop_everything() {
        let trigger = TriggerId::from_name("Loop");
        let mut events = EventManager::new();
        events.add_playing(key(1, 1, 0), trigger, None);
        events.add_playing(key(2, 2, 0), trigger, None);
        events.add_pending(key(3, 3, 0), trigger, None, Duration::from_secs(1));

        let stop = events.stop_everything();
        assert_eq!(stop.stopping, vec![key(1, 1, 0), key(2, 2, 0)]);
        assert_eq!(stop.cancelled.len(), 1);
        assert_eq!(events.len(), 2);
    }
}
