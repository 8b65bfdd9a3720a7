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
//! The low-level audio backend the translation layer drives.
//!
//! Impl data for each control kind is an associated type: the middleware builds it from an
//! [`ImplNode`] when control data is parsed, the control data processor owns it, and every
//! other component only borrows it for the duration of a call.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::config::ImplNode;
use crate::ids::{EventKey, ListenerId, ObjectId, PreloadId, SourceId};
use crate::math::Transform;
use crate::request::CompletionSender;
use crate::sources::AudioInputConfig;

pub mod mock;

/// An error reported by the middleware.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MiddlewareError {
    #[error("invalid implementation data for {name}: {reason}")]
    InvalidImplData { name: String, reason: String },

    #[error("{0} was rejected by the middleware")]
    Rejected(String),

    #[error("middleware is not initialized")]
    NotInitialized,
}

pub type MiddlewareResult<T> = Result<T, MiddlewareError>;

pub trait Middleware: Send + 'static {
    type TriggerData: fmt::Debug + Send;
    type RtpcData: fmt::Debug + Send;
    type SwitchStateData: fmt::Debug + Send;
    type EnvironmentData: fmt::Debug + Send;

    /// A human readable backend name.
    fn name(&self) -> &str;

    /// Initializes the backend. Completions must be reported through `completions`, never by
    /// calling back into the translation layer.
    fn initialize(&mut self, completions: CompletionSender) -> MiddlewareResult<()>;

    /// Stops the backend. Called after every object, listener and bank has been released.
    fn shut_down(&mut self) -> MiddlewareResult<()>;

    /// Frees anything left after shut down.
    fn release(&mut self) {}

    /// Advances the backend by one tick.
    fn update(&mut self, _elapsed: Duration) {}

    fn new_trigger_data(&self, node: &ImplNode) -> MiddlewareResult<Self::TriggerData>;
    fn new_rtpc_data(&self, node: &ImplNode) -> MiddlewareResult<Self::RtpcData>;
    fn new_switch_state_data(&self, node: &ImplNode) -> MiddlewareResult<Self::SwitchStateData>;
    fn new_environment_data(&self, node: &ImplNode) -> MiddlewareResult<Self::EnvironmentData>;

    fn register_object(&mut self, object: ObjectId, name: Option<&str>) -> MiddlewareResult<()>;
    fn unregister_object(&mut self, object: ObjectId) -> MiddlewareResult<()>;
    fn set_object_transform(
        &mut self,
        object: ObjectId,
        transform: &Transform,
    ) -> MiddlewareResult<()>;

    fn register_listener(&mut self, listener: ListenerId) -> MiddlewareResult<()>;
    fn unregister_listener(&mut self, listener: ListenerId) -> MiddlewareResult<()>;
    fn set_listener_transform(
        &mut self,
        listener: ListenerId,
        transform: &Transform,
    ) -> MiddlewareResult<()>;

    /// Loads whatever the trigger needs ahead of activation.
    fn prepare_trigger(
        &mut self,
        _object: ObjectId,
        _trigger: &Self::TriggerData,
    ) -> MiddlewareResult<()> {
        Ok(())
    }

    fn unprepare_trigger(
        &mut self,
        _object: ObjectId,
        _trigger: &Self::TriggerData,
    ) -> MiddlewareResult<()> {
        Ok(())
    }

    /// Starts one event, streaming from `source` if one is given. The backend reports its end
    /// with [`CompletionSender::event_finished`].
    fn activate_trigger(
        &mut self,
        object: ObjectId,
        trigger: &Self::TriggerData,
        event: EventKey,
        source: Option<SourceId>,
    ) -> MiddlewareResult<()>;

    /// Stops a playing event. A stopped event is not reported as finished.
    fn stop_event(&mut self, event: EventKey) -> MiddlewareResult<()>;

    fn set_rtpc(
        &mut self,
        object: ObjectId,
        rtpc: &Self::RtpcData,
        value: f32,
    ) -> MiddlewareResult<()>;

    fn reset_rtpc(&mut self, _object: ObjectId, _rtpc: &Self::RtpcData) -> MiddlewareResult<()> {
        Ok(())
    }

    fn set_switch_state(
        &mut self,
        object: ObjectId,
        state: &Self::SwitchStateData,
    ) -> MiddlewareResult<()>;

    fn set_environment(
        &mut self,
        object: ObjectId,
        environment: &Self::EnvironmentData,
        amount: f32,
    ) -> MiddlewareResult<()>;

    /// Registers bank contents that the file cache has read into memory.
    fn register_bank(
        &mut self,
        preload: PreloadId,
        file: &Path,
        data: &[u8],
    ) -> MiddlewareResult<()>;

    fn unregister_bank(&mut self, preload: PreloadId, file: &Path) -> MiddlewareResult<()>;

    /// Opens an audio input source. Backends without input support refuse it.
    fn create_source(
        &mut self,
        source: SourceId,
        _config: &AudioInputConfig,
    ) -> MiddlewareResult<()> {
        Err(MiddlewareError::Rejected(source.to_string()))
    }

    fn destroy_source(&mut self, _source: SourceId) -> MiddlewareResult<()> {
        Ok(())
    }

    fn mute(&mut self) -> MiddlewareResult<()> {
        Ok(())
    }

    fn unmute(&mut self) -> MiddlewareResult<()> {
        Ok(())
    }

    fn set_language(&mut self, _language: &str) -> MiddlewareResult<()> {
        Ok(())
    }
}
