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
use std::path::PathBuf;

use crate::ids::{ControlKind, ListenerId, ObjectId, SourceId};
use crate::request_listeners::ListenerHandle;
use crate::state::SystemState;

/// Which handle pool ran dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    Objects,
    Listeners,
}

impl std::fmt::Display for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pool::Objects => f.write_str("object"),
            Pool::Listeners => f.write_str("listener"),
        }
    }
}

/// Errors returned by the translation layer. These are also delivered to request listeners
/// and blocking callers, so they are cheap to clone.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("{kind} {id:#010x} is not registered")]
    ControlNotFound { kind: ControlKind, id: u32 },

    #[error("no free {0} handles left")]
    PoolExhausted(Pool),

    #[error("{object} still has {events} live event(s)")]
    ObjectBusy { object: ObjectId, events: usize },

    #[error("middleware failure: {0}")]
    MiddlewareFailure(String),

    #[error("the audio system is shutting down")]
    ShuttingDown,

    #[error("{0} is not reserved")]
    InvalidObject(ObjectId),

    #[error("{0} is not reserved")]
    InvalidListener(ListenerId),

    #[error("{0} is not registered")]
    UnknownRequestListener(ListenerHandle),

    #[error("{0} does not exist")]
    InvalidSource(SourceId),

    #[error("invalid audio source: {0}")]
    InvalidSourceConfig(String),

    #[error("cannot move from {from:?} to {to:?}")]
    InvalidStateTransition { from: SystemState, to: SystemState },

    #[error("error reading control data {}: {message}", path.display())]
    ControlData { path: PathBuf, message: String },

    #[error("the request queue is disconnected")]
    QueueDisconnected,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Thread(String),
}

impl From<crate::middleware::MiddlewareError> for Error {
    fn from(e: crate::middleware::MiddlewareError) -> Self {
        Error::MiddlewareFailure(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
