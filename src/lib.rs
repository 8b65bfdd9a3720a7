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
//! An audio translation layer: a middleware-agnostic request front end for game audio.
//!
//! Game threads push [`Request`]s; a single audio thread drains them each tick, tracks objects,
//! listeners, playing events and loaded banks, and forwards the work to a [`Middleware`]
//! backend.

pub mod atl;
pub mod config;
pub mod controls;
#[cfg(feature = "diagnostics")]
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod file_cache;
pub mod ids;
pub mod listeners;
pub mod math;
pub mod middleware;
pub mod objects;
pub mod request;
pub mod request_listeners;
pub mod snapshot;
pub mod sources;
pub mod state;
pub mod system;
#[cfg(test)]
mod testutil;

pub use atl::TranslationLayer;
pub use config::AtlConfig;
pub use error::{Error, Result};
pub use ids::{
    DataScope, EnvironmentId, EventKey, ListenerId, ObjectId, OwnerId, PreloadId, RtpcId,
    SourceId, SwitchId, SwitchStateId, TriggerId, TriggerInstanceId,
};
pub use math::{Quat, Transform, Vec3};
pub use middleware::Middleware;
pub use request::{
    ListenerRequest, ManagerRequest, Notification, ObjectRequest, Request, RequestOutcome,
    RequestResult, RequestSender,
};
pub use request_listeners::{ListenerHandle, RequestFilter};
pub use sources::{AudioInputConfig, AudioInputSampleType, AudioInputSourceType};
pub use state::SystemState;
pub use system::AudioSystem;
