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
//! The translation layer's admission state machine.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};

/// Running and Muted both accept requests. ShuttingDown is terminal and only admits callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SystemState {
    Running,
    Muted,
    ShuttingDown,
}

impl SystemState {
    /// Returns true for the legal transitions: Running <-> Muted and anything -> ShuttingDown.
    pub fn can_transition_to(self, next: SystemState) -> bool {
        matches!(
            (self, next),
            (SystemState::Running, SystemState::Muted)
                | (SystemState::Muted, SystemState::Running)
                | (SystemState::Running, SystemState::ShuttingDown)
                | (SystemState::Muted, SystemState::ShuttingDown)
        )
    }

    fn to_u8(self) -> u8 {
        match self {
            SystemState::Running => 0,
            SystemState::Muted => 1,
            SystemState::ShuttingDown => 2,
        }
    }

    fn from_u8(value: u8) -> SystemState {
        match value {
            0 => SystemState::Running,
            1 => SystemState::Muted,
            _ => SystemState::ShuttingDown,
        }
    }
}

/// The current state, shared with request senders so that admission can be decided when a
/// request is pushed rather than when it is drained. Only the audio thread writes it.
#[derive(Clone, Debug)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub fn new() -> SharedState {
        SharedState(Arc::new(AtomicU8::new(SystemState::Running.to_u8())))
    }

    pub fn get(&self) -> SystemState {
        SystemState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves to the next state if the transition is legal.
    pub fn transition(&self, next: SystemState) -> Result<SystemState> {
        let current = self.get();
        if !current.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: current,
                to: next,
            });
        }
        self.0.store(next.to_u8(), Ordering::Release);
        Ok(current)
    }

    pub fn can_process_requests(&self) -> bool {
        self.get() != SystemState::ShuttingDown
    }
}

impl Default for SharedState {
    fn default() -> Self {
        SharedState::new()
    }
}
