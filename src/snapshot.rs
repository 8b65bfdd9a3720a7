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
use std::time::Duration;

use crate::ids::ListenerId;
use crate::math::Transform;

/// Listener and timing state for one tick. Built once at the start of the tick and passed by
/// reference into every object operation that runs during it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickSnapshot {
    /// Number of the tick, starting at 1 for the first update.
    pub tick: u64,

    /// Time elapsed since the previous tick.
    pub elapsed: Duration,

    /// Every reserved listener and its last known transform, ordered by id.
    pub listeners: Vec<(ListenerId, Transform)>,

    /// The override listener, used by objects that are not positioned relative to the
    /// nearest listener.
    pub override_listener: Option<(ListenerId, Transform)>,
}

impl TickSnapshot {
    /// Returns the distance from the transform to the closest listener, if there is any.
    pub fn nearest_listener_distance(&self, transform: &Transform) -> Option<f32> {
        self.listeners
            .iter()
            .map(|(_, listener)| listener.distance(transform))
            .min_by(f32::total_cmp)
    }
}
