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
//! The object manager: a bounded pool of audio object handles and the state the translation
//! layer keeps for each reserved object.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::error::{Error, Pool, Result};
use crate::ids::{EnvironmentId, ObjectId, RtpcId, SwitchId, SwitchStateId, TriggerId};
use crate::math::Transform;
use crate::middleware::Middleware;
use crate::snapshot::TickSnapshot;

/// A reserved audio object.
#[derive(Debug, Clone)]
pub struct AudioObject {
    id: ObjectId,
    /// Debug name given at reservation.
    name: Option<String>,
    transform: Transform,
    /// Set when the transform changed since it was last pushed to the middleware.
    transform_dirty: bool,
    /// Last value set for each RTPC.
    rtpcs: HashMap<RtpcId, f32>,
    /// Current state of each switch.
    switches: HashMap<SwitchId, SwitchStateId>,
    /// Last amount set for each environment.
    environments: HashMap<EnvironmentId, f32>,
    prepared: HashSet<TriggerId>,
    /// Distance to the nearest listener as of the last tick.
    listener_distance: Option<f32>,
    /// A release was refused because events were still live.
    release_pending: bool,
}

impl AudioObject {
    fn new(id: ObjectId, name: Option<String>) -> AudioObject {
        AudioObject {
            id,
            name,
            transform: Transform::identity(),
            transform_dirty: false,
            rtpcs: HashMap::new(),
            switches: HashMap::new(),
            environments: HashMap::new(),
            prepared: HashSet::new(),
            listener_distance: None,
            release_pending: false,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        if self.transform != transform {
            self.transform = transform;
            self.transform_dirty = true;
        }
    }

    pub fn rtpc(&self, rtpc: RtpcId) -> Option<f32> {
        self.rtpcs.get(&rtpc).copied()
    }

    pub fn set_rtpc(&mut self, rtpc: RtpcId, value: f32) {
        self.rtpcs.insert(rtpc, value);
    }

    /// Forgets every RTPC value, returning the RTPCs that had one.
    pub fn take_rtpcs(&mut self) -> Vec<RtpcId> {
        let mut rtpcs: Vec<RtpcId> = self.rtpcs.drain().map(|(id, _)| id).collect();
        rtpcs.sort();
        rtpcs
    }

    pub fn switch_state(&self, switch: SwitchId) -> Option<SwitchStateId> {
        self.switches.get(&switch).copied()
    }

    pub fn set_switch_state(&mut self, switch: SwitchId, state: SwitchStateId) {
        self.switches.insert(switch, state);
    }

    pub fn environment(&self, environment: EnvironmentId) -> Option<f32> {
        self.environments.get(&environment).copied()
    }

    pub fn set_environment(&mut self, environment: EnvironmentId, amount: f32) {
        self.environments.insert(environment, amount);
    }

    /// Forgets every environment amount, returning the environments that had one.
    pub fn take_environments(&mut self) -> Vec<EnvironmentId> {
        let mut environments: Vec<EnvironmentId> =
            self.environments.drain().map(|(id, _)| id).collect();
        environments.sort();
        environments
    }

    pub fn is_prepared(&self, trigger: TriggerId) -> bool {
        self.prepared.contains(&trigger)
    }

    /// Returns false if the trigger was already prepared.
    pub fn mark_prepared(&mut self, trigger: TriggerId) -> bool {
        self.prepared.insert(trigger)
    }

    /// Returns false if the trigger wasn't prepared.
    pub fn mark_unprepared(&mut self, trigger: TriggerId) -> bool {
        self.prepared.remove(&trigger)
    }

    pub fn listener_distance(&self) -> Option<f32> {
        self.listener_distance
    }

    pub fn is_release_pending(&self) -> bool {
        self.release_pending
    }
}

/// Largest pool that still fits the handle space after the global object.
pub const MAX_OBJECT_POOL_SIZE: usize = (u32::MAX - ObjectId::GLOBAL.raw()) as usize;

/// Pool of audio object handles. The global object is created with the manager and is never
/// part of the pool.
pub struct ObjectManager {
    objects: HashMap<ObjectId, AudioObject>,
    /// Free handles. The next reservation pops from the back.
    free: Vec<ObjectId>,
    capacity: usize,
}

impl ObjectManager {
    pub fn new(capacity: usize) -> ObjectManager {
        let capacity = if capacity > MAX_OBJECT_POOL_SIZE {
            warn!(
                requested = capacity,
                max = MAX_OBJECT_POOL_SIZE,
                "Object pool too large, clamping"
            );
            MAX_OBJECT_POOL_SIZE
        } else {
            capacity
        };
        let first = ObjectId::GLOBAL.raw() + 1;
        let free = (0..capacity)
            .rev()
            .filter_map(|offset| u32::try_from(offset).ok())
            .map(|offset| ObjectId::from_raw(first + offset))
            .collect();

        let mut objects = HashMap::with_capacity(capacity + 1);
        objects.insert(
            ObjectId::GLOBAL,
            AudioObject::new(ObjectId::GLOBAL, Some("global".to_string())),
        );

        ObjectManager {
            objects,
            free,
            capacity,
        }
    }

    /// Registers the global object with the middleware.
    pub fn initialize<M: Middleware>(&self, middleware: &mut M) -> Result<()> {
        middleware.register_object(ObjectId::GLOBAL, Some("global"))?;
        Ok(())
    }

    /// Reserves the next free handle and registers it with the middleware.
    pub fn reserve<M: Middleware>(
        &mut self,
        middleware: &mut M,
        name: Option<String>,
    ) -> Result<ObjectId> {
        let id = self.free.pop().ok_or(Error::PoolExhausted(Pool::Objects))?;
        if let Err(e) = middleware.register_object(id, name.as_deref()) {
            self.free.push(id);
            return Err(e.into());
        }

        debug!(object = %id, name = ?name, "Object reserved");
        self.objects.insert(id, AudioObject::new(id, name));
        Ok(id)
    }

    /// Releases an object. Fails with [`Error::ObjectBusy`] while it still has live events, in
    /// which case the release is remembered and reported once the events are gone.
    pub fn release<M: Middleware>(
        &mut self,
        middleware: &mut M,
        id: ObjectId,
        live_events: usize,
    ) -> Result<()> {
        if id.is_global() {
            return Err(Error::InvalidObject(id));
        }
        let object = self.objects.get_mut(&id).ok_or(Error::InvalidObject(id))?;
        if live_events > 0 {
            object.release_pending = true;
            return Err(Error::ObjectBusy {
                object: id,
                events: live_events,
            });
        }

        self.objects.remove(&id);
        self.free.push(id);
        if let Err(e) = middleware.unregister_object(id) {
            warn!(object = %id, err = %e, "Middleware failed to unregister object");
        }
        debug!(object = %id, "Object released");
        Ok(())
    }

    /// Called once an object has no live events left. Returns true if a release had been
    /// refused for it, clearing the flag.
    pub fn take_release_pending(&mut self, id: ObjectId) -> bool {
        match self.objects.get_mut(&id) {
            Some(object) if object.release_pending => {
                object.release_pending = false;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: ObjectId) -> Result<&AudioObject> {
        self.objects.get(&id).ok_or(Error::InvalidObject(id))
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut AudioObject> {
        self.objects.get_mut(&id).ok_or(Error::InvalidObject(id))
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Reserved object ids in ascending order, the global object included.
    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of reserved objects, not counting the global object.
    pub fn reserved(&self) -> usize {
        self.objects
            .keys()
            .filter(|id| !id.is_global())
            .count()
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pushes changed positions to the middleware and records listener distances.
    pub fn update<M: Middleware>(&mut self, snapshot: &TickSnapshot, middleware: &mut M) {
        for object in self.objects.values_mut() {
            if object.id.is_global() {
                object.listener_distance = snapshot
                    .override_listener
                    .map(|(_, listener)| listener.distance(&object.transform));
                continue;
            }

            if object.transform_dirty {
                match middleware.set_object_transform(object.id, &object.transform) {
                    Ok(()) => object.transform_dirty = false,
                    Err(e) => {
                        warn!(object = %object.id, err = %e, "Unable to update object position")
                    }
                }
            }
            object.listener_distance = snapshot.nearest_listener_distance(&object.transform);
        }
    }

    /// Unregisters every object, the global one last. Only used during shut down, after all
    /// events have been stopped.
    pub fn release_all<M: Middleware>(&mut self, middleware: &mut M) {
        for id in self.ids().into_iter().rev() {
            if let Err(e) = middleware.unregister_object(id) {
                warn!(object = %id, err = %e, "Middleware failed to unregister object");
            }
            self.objects.remove(&id);
            if !id.is_global() {
                self.free.push(id);
            }
        }
    }
}
