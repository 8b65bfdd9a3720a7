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
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use duration_string::DurationString;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{Middleware, MiddlewareError, MiddlewareResult};
use crate::config::ImplNode;
use crate::ids::{EventKey, ListenerId, ObjectId, PreloadId, SourceId};
use crate::math::Transform;
use crate::request::CompletionSender;
use crate::sources::AudioInputConfig;

/// Everything the mock middleware was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    RegisterObject(ObjectId),
    UnregisterObject(ObjectId),
    SetObjectTransform(ObjectId),
    RegisterListener(ListenerId),
    UnregisterListener(ListenerId),
    SetListenerTransform(ListenerId),
    PrepareTrigger { object: ObjectId, event: String },
    UnprepareTrigger { object: ObjectId, event: String },
    ActivateTrigger {
        event: String,
        key: EventKey,
        source: Option<SourceId>,
    },
    StopEvent(EventKey),
    SetRtpc { object: ObjectId, name: String, value: f32 },
    ResetRtpc { object: ObjectId, name: String },
    SetSwitchState { object: ObjectId, name: String },
    SetEnvironment { object: ObjectId, name: String, amount: f32 },
    CreateSource(SourceId),
    DestroySource(SourceId),
    RegisterBank { preload: PreloadId, file: PathBuf },
    UnregisterBank { preload: PreloadId, file: PathBuf },
    Mute,
    Unmute,
    SetLanguage(String),
    ShutDown,
}

/// Trigger impl data for the mock middleware.
///
/// Parameters: `duration` (e.g. "250ms") makes the event finish on its own after that long;
/// `reject: "true"` makes every activation fail.
#[derive(Debug, Clone)]
pub struct MockTriggerData {
    event: String,
    duration: Option<Duration>,
    reject: bool,
}

impl MockTriggerData {
    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

/// RTPC, switch state and environment impl data for the mock middleware.
#[derive(Debug, Clone)]
pub struct MockControlData {
    name: String,
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    /// Playing events and the time left until they finish on their own.
    playing: HashMap<EventKey, Option<Duration>>,
    objects: HashSet<ObjectId>,
    listeners: HashSet<ListenerId>,
    banks: HashSet<(PreloadId, PathBuf)>,
    sources: HashSet<SourceId>,
    muted: bool,
    completions: Option<CompletionSender>,
}

/// A mock middleware. Doesn't play anything, but keeps track of what it was asked to do and
/// reports event completions through the request queue like a real backend would.
pub struct MockMiddleware {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockMiddleware {
    pub fn new(name: &str) -> MockMiddleware {
        MockMiddleware {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Returns a handle for inspecting and driving the mock from another owner.
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }

    fn record(&self, call: MockCall) {
        self.state.lock().calls.push(call);
    }
}

impl Middleware for MockMiddleware {
    type TriggerData = MockTriggerData;
    type RtpcData = MockControlData;
    type SwitchStateData = MockControlData;
    type EnvironmentData = MockControlData;

    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, completions: CompletionSender) -> MiddlewareResult<()> {
        info!(middleware = self.name, "Mock middleware initialized");
        self.state.lock().completions = Some(completions);
        Ok(())
    }

    fn shut_down(&mut self) -> MiddlewareResult<()> {
        let mut state = self.state.lock();
        if !state.objects.is_empty() || !state.banks.is_empty() {
            warn!(
                objects = state.objects.len(),
                banks = state.banks.len(),
                "Mock middleware shut down with live registrations"
            );
        }
        state.calls.push(MockCall::ShutDown);
        state.playing.clear();
        Ok(())
    }

    fn release(&mut self) {
        self.state.lock().completions = None;
    }

    fn update(&mut self, elapsed: Duration) {
        let mut state = self.state.lock();
        let mut finished = Vec::new();
        for (key, remaining) in state.playing.iter_mut() {
            if let Some(left) = remaining {
                *left = left.saturating_sub(elapsed);
                if left.is_zero() {
                    finished.push(*key);
                }
            }
        }
        for key in finished {
            state.playing.remove(&key);
            if let Some(completions) = &state.completions {
                if let Err(e) = completions.event_finished(key) {
                    warn!(event = %key, err = %e, "Unable to report finished event");
                }
            }
        }
    }

    fn new_trigger_data(&self, node: &ImplNode) -> MiddlewareResult<MockTriggerData> {
        let duration = match node.param("duration") {
            Some(duration) => Some(
                DurationString::from_string(duration.to_string())
                    .map_err(|e| MiddlewareError::InvalidImplData {
                        name: node.name().to_string(),
                        reason: e.to_string(),
                    })?
                    .into(),
            ),
            None => None,
        };
        Ok(MockTriggerData {
            event: node.name().to_string(),
            duration,
            reject: node.param("reject") == Some("true"),
        })
    }

    fn new_rtpc_data(&self, node: &ImplNode) -> MiddlewareResult<MockControlData> {
        Ok(MockControlData {
            name: node.name().to_string(),
        })
    }

    fn new_switch_state_data(&self, node: &ImplNode) -> MiddlewareResult<MockControlData> {
        Ok(MockControlData {
            name: node.name().to_string(),
        })
    }

    fn new_environment_data(&self, node: &ImplNode) -> MiddlewareResult<MockControlData> {
        Ok(MockControlData {
            name: node.name().to_string(),
        })
    }

    fn register_object(&mut self, object: ObjectId, name: Option<&str>) -> MiddlewareResult<()> {
        debug!(object = %object, name, "Mock object registered");
        let mut state = self.state.lock();
        state.objects.insert(object);
        state.calls.push(MockCall::RegisterObject(object));
        Ok(())
    }

    fn unregister_object(&mut self, object: ObjectId) -> MiddlewareResult<()> {
        let mut state = self.state.lock();
        state.objects.remove(&object);
        state.calls.push(MockCall::UnregisterObject(object));
        Ok(())
    }

    fn set_object_transform(
        &mut self,
        object: ObjectId,
        _transform: &Transform,
    ) -> MiddlewareResult<()> {
        self.record(MockCall::SetObjectTransform(object));
        Ok(())
    }

    fn register_listener(&mut self, listener: ListenerId) -> MiddlewareResult<()> {
        let mut state = self.state.lock();
        state.listeners.insert(listener);
        state.calls.push(MockCall::RegisterListener(listener));
        Ok(())
    }

    fn unregister_listener(&mut self, listener: ListenerId) -> MiddlewareResult<()> {
        let mut state = self.state.lock();
        state.listeners.remove(&listener);
        state.calls.push(MockCall::UnregisterListener(listener));
        Ok(())
    }

    fn set_listener_transform(
        &mut self,
        listener: ListenerId,
        _transform: &Transform,
    ) -> MiddlewareResult<()> {
        self.record(MockCall::SetListenerTransform(listener));
        Ok(())
    }

    fn prepare_trigger(
        &mut self,
        object: ObjectId,
        trigger: &MockTriggerData,
    ) -> MiddlewareResult<()> {
        self.record(MockCall::PrepareTrigger {
            object,
            event: trigger.event.clone(),
        });
        Ok(())
    }

    fn unprepare_trigger(
        &mut self,
        object: ObjectId,
        trigger: &MockTriggerData,
    ) -> MiddlewareResult<()> {
        self.record(MockCall::UnprepareTrigger {
            object,
            event: trigger.event.clone(),
        });
        Ok(())
    }

    fn activate_trigger(
        &mut self,
        object: ObjectId,
        trigger: &MockTriggerData,
        event: EventKey,
        source: Option<SourceId>,
    ) -> MiddlewareResult<()> {
        if trigger.reject {
            return Err(MiddlewareError::Rejected(trigger.event.clone()));
        }
        let mut state = self.state.lock();
        if !state.objects.contains(&object) && !object.is_global() {
            return Err(MiddlewareError::Rejected(format!(
                "{} on unregistered {}",
                trigger.event, object
            )));
        }
        if let Some(source) = source.filter(|s| !state.sources.contains(s)) {
            return Err(MiddlewareError::Rejected(format!(
                "{} from unknown {}",
                trigger.event, source
            )));
        }
        state.playing.insert(event, trigger.duration);
        state.calls.push(MockCall::ActivateTrigger {
            event: trigger.event.clone(),
            key: event,
            source,
        });
        Ok(())
    }

    fn create_source(
        &mut self,
        source: SourceId,
        config: &AudioInputConfig,
    ) -> MiddlewareResult<()> {
        debug!(source = %source, kind = %config.source_type, "Mock audio source created");
        let mut state = self.state.lock();
        state.sources.insert(source);
        state.calls.push(MockCall::CreateSource(source));
        Ok(())
    }

    fn destroy_source(&mut self, source: SourceId) -> MiddlewareResult<()> {
        let mut state = self.state.lock();
        state.sources.remove(&source);
        state.calls.push(MockCall::DestroySource(source));
        Ok(())
    }

    fn stop_event(&mut self, event: EventKey) -> MiddlewareResult<()> {
        let mut state = self.state.lock();
        state.playing.remove(&event);
        state.calls.push(MockCall::StopEvent(event));
        Ok(())
    }

    fn set_rtpc(
        &mut self,
        object: ObjectId,
        rtpc: &MockControlData,
        value: f32,
    ) -> MiddlewareResult<()> {
        self.record(MockCall::SetRtpc {
            object,
            name: rtpc.name.clone(),
            value,
        });
        Ok(())
    }

    fn reset_rtpc(&mut self, object: ObjectId, rtpc: &MockControlData) -> MiddlewareResult<()> {
        self.record(MockCall::ResetRtpc {
            object,
            name: rtpc.name.clone(),
        });
        Ok(())
    }

    fn set_switch_state(
        &mut self,
        object: ObjectId,
        state: &MockControlData,
    ) -> MiddlewareResult<()> {
        self.record(MockCall::SetSwitchState {
            object,
            name: state.name.clone(),
        });
        Ok(())
    }

    fn set_environment(
        &mut self,
        object: ObjectId,
        environment: &MockControlData,
        amount: f32,
    ) -> MiddlewareResult<()> {
        self.record(MockCall::SetEnvironment {
            object,
            name: environment.name.clone(),
            amount,
        });
        Ok(())
    }

    fn register_bank(
        &mut self,
        preload: PreloadId,
        file: &Path,
        data: &[u8],
    ) -> MiddlewareResult<()> {
        if data.is_empty() {
            return Err(MiddlewareError::Rejected(format!(
                "empty bank {}",
                file.display()
            )));
        }
        let mut state = self.state.lock();
        state.banks.insert((preload, file.to_path_buf()));
        state.calls.push(MockCall::RegisterBank {
            preload,
            file: file.to_path_buf(),
        });
        Ok(())
    }

    fn unregister_bank(&mut self, preload: PreloadId, file: &Path) -> MiddlewareResult<()> {
        let mut state = self.state.lock();
        state.banks.remove(&(preload, file.to_path_buf()));
        state.calls.push(MockCall::UnregisterBank {
            preload,
            file: file.to_path_buf(),
        });
        Ok(())
    }

    fn mute(&mut self) -> MiddlewareResult<()> {
        let mut state = self.state.lock();
        state.muted = true;
        state.calls.push(MockCall::Mute);
        Ok(())
    }

    fn unmute(&mut self) -> MiddlewareResult<()> {
        let mut state = self.state.lock();
        state.muted = false;
        state.calls.push(MockCall::Unmute);
        Ok(())
    }

    fn set_language(&mut self, language: &str) -> MiddlewareResult<()> {
        self.record(MockCall::SetLanguage(language.to_string()));
        Ok(())
    }
}

/// Inspects and drives a [`MockMiddleware`] after it has been moved into the translation layer.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Counts recorded calls matching the predicate.
    pub fn count_calls(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(*c)).count()
    }

    pub fn playing_events(&self) -> Vec<EventKey> {
        let mut events: Vec<EventKey> = self.state.lock().playing.keys().copied().collect();
        events.sort();
        events
    }

    /// Finishes a playing event as if the backend reached its end. Returns false if the event
    /// was not playing.
    pub fn finish_event(&self, key: EventKey) -> bool {
        let mut state = self.state.lock();
        if state.playing.remove(&key).is_none() {
            return false;
        }
        match &state.completions {
            Some(completions) => completions.event_finished(key).is_ok(),
            None => false,
        }
    }

    /// Reports a completion for an event regardless of whether it is playing, which is what a
    /// late backend callback racing a stop looks like.
    pub fn report_finished(&self, key: EventKey) -> bool {
        let state = self.state.lock();
        match &state.completions {
            Some(completions) => completions.event_finished(key).is_ok(),
            None => false,
        }
    }

    pub fn registered_objects(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn registered_listeners(&self) -> usize {
        self.state.lock().listeners.len()
    }

    pub fn has_bank(&self, preload: PreloadId, file: &Path) -> bool {
        self.state
            .lock()
            .banks
            .contains(&(preload, file.to_path_buf()))
    }

    pub fn bank_count(&self) -> usize {
        self.state.lock().banks.len()
    }

    pub fn source_count(&self) -> usize {
        self.state.lock().sources.len()
    }

    pub fn is_muted(&self) -> bool {
        self.state.lock().muted
    }
}
