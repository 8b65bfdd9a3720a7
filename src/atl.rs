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
//! The translation layer core: the single entry point that applies requests to the managers
//! and forwards the resulting work to the middleware.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, info, span, warn, Level};

use crate::config::AtlConfig;
use crate::controls::ControlDataProcessor;
use crate::error::{Error, Result};
use crate::events::{EventManager, Finished, Stop};
use crate::file_cache::{FileCacheManager, LoadStatus};
use crate::ids::{
    DataScope, EnvironmentId, EventKey, ListenerId, ObjectId, OwnerId, PreloadId, RtpcId,
    SourceId, SwitchId, SwitchStateId, TriggerId, TriggerInstanceId,
};
use crate::listeners::ListenerManager;
use crate::middleware::{Middleware, MiddlewareResult};
use crate::objects::ObjectManager;
use crate::request::{
    CallbackRequest, CompletionSender, ListenerRequest, ManagerRequest, Notification,
    ObjectRequest, Queued, Request, RequestData, RequestKind, RequestOutcome, RequestQueue,
    RequestResult, RequestSender,
};
use crate::request_listeners::{Callback, ListenerHandle, RequestFilter, RequestListenerManager};
use crate::snapshot::TickSnapshot;
use crate::sources::SourceManager;
use crate::state::{SharedState, SystemState};

/// Translates generic audio requests into middleware operations.
///
/// Everything here runs on one thread. Other threads talk to it through a [`RequestSender`],
/// and the middleware reports completions through the same queue.
pub struct TranslationLayer<M: Middleware> {
    middleware: M,
    state: SharedState,
    queue: RequestQueue,
    objects: ObjectManager,
    listeners: ListenerManager,
    events: EventManager,
    file_cache: FileCacheManager,
    controls: ControlDataProcessor<M>,
    request_listeners: RequestListenerManager,
    sources: SourceManager,
    /// The snapshot of the current tick.
    snapshot: TickSnapshot,
    next_instance: u64,
    language: String,
    /// Folder holding the global control data, parsed at initialization.
    controls_path: Option<std::path::PathBuf>,
    initialized: bool,
    /// Set once shut down has completed. Nothing is processed afterwards.
    released: bool,
}

impl<M: Middleware> TranslationLayer<M> {
    pub fn new(middleware: M, config: &AtlConfig) -> TranslationLayer<M> {
        let state = SharedState::new();
        TranslationLayer {
            middleware,
            queue: RequestQueue::new(state.clone()),
            state,
            objects: ObjectManager::new(config.object_pool_size()),
            listeners: ListenerManager::new(config.listener_pool_size()),
            events: EventManager::new(),
            file_cache: FileCacheManager::new(),
            controls: ControlDataProcessor::new(),
            request_listeners: RequestListenerManager::new(),
            sources: SourceManager::new(),
            snapshot: TickSnapshot::default(),
            next_instance: 1,
            language: config.language().to_string(),
            controls_path: config.controls_path(),
            initialized: false,
            released: false,
        }
    }

    /// Initializes the middleware, registers the global object and, if a controls path is
    /// configured, parses the global control and preload data found there.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let completions = CompletionSender::new(self.queue.sender());

        info!(middleware = self.middleware.name(), "Initializing translation layer");
        self.middleware.initialize(completions.clone())?;
        self.middleware.set_language(&self.language)?;
        self.objects.initialize(&mut self.middleware)?;
        self.file_cache.initialize(completions)?;
        self.initialized = true;

        if let Some(path) = self.controls_path.clone() {
            if let Err(e) = self.parse_data(&path, DataScope::Global) {
                error!(path = ?path, err = %e, "Unable to parse global control data");
            }
        }
        Ok(())
    }

    /// A handle for queueing requests from any thread.
    pub fn sender(&self) -> RequestSender {
        self.queue.sender()
    }

    /// Queues a request for the next update.
    pub fn push_request(&self, request: Request) -> Result<()> {
        self.sender().push(request)
    }

    pub fn can_process_requests(&self) -> bool {
        self.state.can_process_requests()
    }

    pub fn state(&self) -> SystemState {
        self.state.get()
    }

    /// Applies a request right away. Rejected with [`Error::ShuttingDown`] once shut down has
    /// started, except for callbacks.
    pub fn process_request(&mut self, request: Request) -> RequestResult {
        let admitted = request.kind() == RequestKind::Callback || self.can_process_requests();
        self.handle(Queued { request, admitted })
    }

    /// Runs one tick: applies queued requests, refreshes the tick snapshot, then advances
    /// objects, deferred events and the middleware.
    pub fn update(&mut self, elapsed: Duration) {
        if self.released {
            return;
        }

        self.drain_queue();

        self.listeners.update(&mut self.middleware);
        self.snapshot = self
            .listeners
            .snapshot(self.snapshot.tick + 1, elapsed);
        self.objects.update(&self.snapshot, &mut self.middleware);

        let due = self.events.update(elapsed);
        self.start_deferred(due);

        self.middleware.update(elapsed);
    }

    /// Applies every request that was queued when the drain started. Requests queued while
    /// draining, such as completions reported by the middleware, wait for the next drain.
    fn drain_queue(&mut self) -> usize {
        let pending = self.queue.len();
        let mut processed = 0;
        for _ in 0..pending {
            match self.queue.try_pop() {
                Some(queued) => {
                    let _ = self.handle(queued);
                    processed += 1;
                }
                None => break,
            }
        }
        processed
    }

    fn handle(&mut self, queued: Queued) -> RequestResult {
        let Queued {
            mut request,
            admitted,
        } = queued;
        let kind = request.kind();

        let result = if admitted {
            self.dispatch(&mut request)
        } else {
            Err(Error::ShuttingDown)
        };

        if let Err(e) = &result {
            debug!(kind = ?kind, err = %e, "Request failed");
        }
        request.reply(&result);
        if kind != RequestKind::Callback {
            self.request_listeners
                .notify(&Notification::RequestCompleted {
                    kind,
                    owner: request.owner,
                    result: result.clone(),
                });
        }
        result
    }

    fn dispatch(&mut self, request: &mut Request) -> RequestResult {
        match &mut request.data {
            RequestData::Manager(manager) => self.process_manager_request(manager),
            RequestData::Callback(callback) => self.process_callback_request(callback),
            RequestData::Object { object, request: op } => {
                self.process_object_request(*object, op, request.owner)
            }
            RequestData::Listener { listener, request } => {
                self.process_listener_request(*listener, request)
            }
        }
    }

    fn process_manager_request(&mut self, request: &mut ManagerRequest) -> RequestResult {
        match request {
            ManagerRequest::ReserveObject { name } => {
                let id = self.objects.reserve(&mut self.middleware, name.clone())?;
                Ok(RequestOutcome::ObjectReserved(id))
            }
            ManagerRequest::ReleaseObject(id) => {
                self.release_object(*id)?;
                Ok(RequestOutcome::Done)
            }
            ManagerRequest::ReserveListener => {
                let id = self.listeners.reserve(&mut self.middleware)?;
                Ok(RequestOutcome::ListenerReserved(id))
            }
            ManagerRequest::ReleaseListener(id) => {
                self.listeners.release(&mut self.middleware, *id)?;
                Ok(RequestOutcome::Done)
            }
            ManagerRequest::SetOverrideListener(id) => {
                self.listeners.set_override(*id)?;
                Ok(RequestOutcome::Done)
            }
            ManagerRequest::ParseControlsData { folder, scope } => {
                self.controls
                    .parse_controls_data(&self.middleware, folder, *scope)?;
                Ok(RequestOutcome::Done)
            }
            ManagerRequest::ClearControlsData(scope) => {
                self.clear_controls(*scope);
                Ok(RequestOutcome::Done)
            }
            ManagerRequest::ParsePreloadsData { folder, scope } => {
                self.file_cache.parse_preloads_data(folder, *scope)?;
                Ok(RequestOutcome::Done)
            }
            ManagerRequest::ClearPreloadsData(scope) => {
                self.file_cache
                    .clear_preloads_data(&mut self.middleware, *scope);
                Ok(RequestOutcome::Done)
            }
            ManagerRequest::PreloadSingleRequest(id) => match self.file_cache.load(*id)? {
                LoadStatus::Loaded => Ok(RequestOutcome::Done),
                LoadStatus::Loading => Ok(RequestOutcome::Pending),
            },
            ManagerRequest::UnloadSingleRequest(id) => {
                self.file_cache.unload(&mut self.middleware, *id)?;
                Ok(RequestOutcome::Done)
            }
            ManagerRequest::RefreshAudioSystem {
                controls_folder,
                level_folder,
            } => {
                self.refresh(controls_folder, level_folder.as_deref())?;
                Ok(RequestOutcome::Done)
            }
            ManagerRequest::StopAllSounds => {
                let stop = self.events.stop_everything();
                self.apply_stop(stop);
                Ok(RequestOutcome::Done)
            }
            ManagerRequest::ChangeLanguage(language) => {
                self.middleware.set_language(language)?;
                info!(language = %language, "Language changed");
                self.language = language.clone();
                Ok(RequestOutcome::Done)
            }
            ManagerRequest::Mute => {
                self.change_state(SystemState::Muted)?;
                Ok(RequestOutcome::Done)
            }
            ManagerRequest::Unmute => {
                self.change_state(SystemState::Running)?;
                Ok(RequestOutcome::Done)
            }
            ManagerRequest::AddRequestListener(listener) => {
                let handle = self
                    .request_listeners
                    .add(listener.filter(), listener.take_callback());
                Ok(RequestOutcome::RequestListenerAdded(handle))
            }
            ManagerRequest::RemoveRequestListener(handle) => {
                if self.request_listeners.remove(*handle) {
                    Ok(RequestOutcome::Done)
                } else {
                    Err(Error::UnknownRequestListener(*handle))
                }
            }
            ManagerRequest::CreateAudioSource(config) => {
                let id = self.sources.create(&mut self.middleware, config.clone())?;
                Ok(RequestOutcome::SourceCreated(id))
            }
            ManagerRequest::DestroyAudioSource(id) => {
                self.sources.destroy(&mut self.middleware, *id)?;
                Ok(RequestOutcome::Done)
            }
        }
    }

    fn process_callback_request(&mut self, request: &CallbackRequest) -> RequestResult {
        match request {
            CallbackRequest::EventFinished(key) => {
                match self.events.report_finished(*key) {
                    Some(finished) => self.after_finished(finished),
                    None => debug!(event = %key, "Completion for an event that is gone"),
                }
                Ok(RequestOutcome::Done)
            }
            CallbackRequest::BankRead {
                preload,
                ticket,
                bank,
                result,
            } => {
                let notification = self.file_cache.handle_bank_read(
                    &mut self.middleware,
                    *preload,
                    *ticket,
                    *bank,
                    result.clone(),
                );
                if let Some(notification) = notification {
                    self.request_listeners.notify(&notification);
                }
                Ok(RequestOutcome::Done)
            }
        }
    }

    fn process_object_request(
        &mut self,
        object: ObjectId,
        request: &ObjectRequest,
        owner: Option<OwnerId>,
    ) -> RequestResult {
        if !self.objects.contains(object) {
            return Err(Error::InvalidObject(object));
        }

        match request {
            ObjectRequest::PrepareTrigger(trigger_id) => {
                let trigger = self.controls.trigger(*trigger_id)?;
                let middleware = &mut self.middleware;
                forward_entries(trigger.entries(), |data| {
                    middleware.prepare_trigger(object, data)
                })?;
                self.objects.get_mut(object)?.mark_prepared(*trigger_id);
                Ok(RequestOutcome::Done)
            }
            ObjectRequest::UnprepareTrigger(trigger_id) => {
                let trigger = self.controls.trigger(*trigger_id)?;
                if self.objects.get_mut(object)?.mark_unprepared(*trigger_id) {
                    let middleware = &mut self.middleware;
                    forward_entries(trigger.entries(), |data| {
                        middleware.unprepare_trigger(object, data)
                    })?;
                }
                Ok(RequestOutcome::Done)
            }
            ObjectRequest::ExecuteTrigger {
                trigger,
                delay,
                source,
            } => {
                let instance = self.execute_trigger(object, *trigger, *delay, *source, owner)?;
                Ok(RequestOutcome::TriggerActivated(instance))
            }
            ObjectRequest::StopTrigger(trigger) => {
                let stop = self.events.stop_trigger(object, *trigger);
                self.apply_stop(stop);
                Ok(RequestOutcome::Done)
            }
            ObjectRequest::StopAllTriggers { owner_only } => {
                let filter = if *owner_only { owner } else { None };
                let stop = self.events.stop_all(object, filter);
                self.apply_stop(stop);
                Ok(RequestOutcome::Done)
            }
            ObjectRequest::SetPosition(transform) => {
                self.objects.get_mut(object)?.set_transform(*transform);
                Ok(RequestOutcome::Done)
            }
            ObjectRequest::SetRtpcValue { rtpc, value } => {
                self.set_rtpc(object, *rtpc, *value)?;
                Ok(RequestOutcome::Done)
            }
            ObjectRequest::ResetRtpcs => {
                let rtpcs = self.objects.get_mut(object)?.take_rtpcs();
                for id in rtpcs {
                    match self.controls.rtpc(id) {
                        Ok(rtpc) => {
                            let middleware = &mut self.middleware;
                            if let Err(e) = forward_entries(rtpc.entries(), |data| {
                                middleware.reset_rtpc(object, data)
                            }) {
                                warn!(object = %object, rtpc = %id, err = %e, "Unable to reset RTPC");
                            }
                        }
                        Err(_) => debug!(rtpc = %id, "RTPC no longer registered"),
                    }
                }
                Ok(RequestOutcome::Done)
            }
            ObjectRequest::SetSwitchState { switch, state } => {
                self.set_switch_state(object, *switch, *state)?;
                Ok(RequestOutcome::Done)
            }
            ObjectRequest::SetEnvironmentAmount {
                environment,
                amount,
            } => {
                self.set_environment(object, *environment, *amount)?;
                Ok(RequestOutcome::Done)
            }
            ObjectRequest::ResetEnvironments => {
                let environments = self.objects.get_mut(object)?.take_environments();
                for id in environments {
                    match self.controls.environment(id) {
                        Ok(environment) => {
                            let middleware = &mut self.middleware;
                            if let Err(e) = forward_entries(environment.entries(), |data| {
                                middleware.set_environment(object, data, 0.0)
                            }) {
                                warn!(object = %object, environment = %id, err = %e, "Unable to reset environment");
                            }
                        }
                        Err(_) => debug!(environment = %id, "Environment no longer registered"),
                    }
                }
                Ok(RequestOutcome::Done)
            }
        }
    }

    fn process_listener_request(
        &mut self,
        listener: ListenerId,
        request: &ListenerRequest,
    ) -> RequestResult {
        match request {
            ListenerRequest::SetTransform(transform) => {
                self.listeners.set_transform(listener, *transform)?;
                Ok(RequestOutcome::Done)
            }
        }
    }

    /// Starts one event per implementation entry of the trigger, all bound to a fresh
    /// activation. Fails only if the middleware rejected every entry.
    fn execute_trigger(
        &mut self,
        object: ObjectId,
        trigger_id: TriggerId,
        delay: Duration,
        source: Option<SourceId>,
        owner: Option<OwnerId>,
    ) -> Result<TriggerInstanceId> {
        let trigger = self.controls.trigger(trigger_id)?;
        if let Some(source) = source {
            self.sources.get(source)?;
        }
        let instance = TriggerInstanceId::from_raw(self.next_instance);
        self.next_instance += 1;

        let mut started = 0;
        let mut last_error = None;
        for (index, data) in trigger.entries().iter().enumerate() {
            let Ok(entry) = u16::try_from(index) else {
                warn!(trigger = trigger.name(), "Too many implementation entries, ignoring the rest");
                break;
            };
            let key = EventKey {
                object,
                instance,
                entry,
            };

            if !delay.is_zero() {
                self.events.add_pending(key, trigger_id, owner, delay);
                if let Some(source) = source {
                    self.events.set_source(key, source);
                }
                started += 1;
                continue;
            }

            match self.middleware.activate_trigger(object, data, key, source) {
                Ok(()) => {
                    self.events.add_playing(key, trigger_id, owner);
                    if let Some(source) = source {
                        self.events.set_source(key, source);
                    }
                    started += 1;
                }
                Err(e) => {
                    warn!(trigger = trigger.name(), event = %key, err = %e, "Middleware rejected event");
                    last_error = Some(e);
                }
            }
        }

        match (started, last_error) {
            (0, Some(e)) => Err(e.into()),
            (0, None) => {
                // Nothing to play, so the activation is over already.
                self.request_listeners
                    .notify(&Notification::TriggerFinished {
                        object,
                        trigger: trigger_id,
                        instance,
                        owner,
                    });
                Ok(instance)
            }
            _ => {
                debug!(object = %object, trigger = %trigger_id, instance = %instance, events = started, "Trigger activated");
                Ok(instance)
            }
        }
    }

    /// Starts deferred events that are due. An event whose source was destroyed meanwhile
    /// is dropped.
    fn start_deferred(&mut self, due: Vec<(EventKey, TriggerId)>) {
        for (key, trigger_id) in due {
            let data = self
                .controls
                .trigger(trigger_id)
                .ok()
                .and_then(|trigger| trigger.entries().get(key.entry as usize));
            let source = self.events.get(key).and_then(|event| event.source());

            let started = match (data, source) {
                (None, _) => {
                    warn!(event = %key, trigger = %trigger_id, "Deferred event lost its trigger");
                    false
                }
                (Some(_), Some(source)) if !self.sources.contains(source) => {
                    warn!(event = %key, source = %source, "Deferred event lost its source");
                    false
                }
                (Some(data), source) => {
                    match self.middleware.activate_trigger(key.object, data, key, source) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(event = %key, err = %e, "Middleware rejected deferred event");
                            false
                        }
                    }
                }
            };

            if started {
                self.events.mark_playing(key);
            } else if let Some(finished) = self.events.report_finished(key) {
                self.after_finished(finished);
            }
        }
    }

    /// Forwards stops to the middleware and removes the stopped events. Events the middleware
    /// failed to stop stay live until their completion arrives.
    fn apply_stop(&mut self, stop: Stop) {
        for key in stop.stopping {
            match self.middleware.stop_event(key) {
                Ok(()) => {
                    if let Some(finished) = self.events.report_finished(key) {
                        self.after_finished(finished);
                    }
                }
                Err(e) => warn!(event = %key, err = %e, "Middleware failed to stop event"),
            }
        }
        for finished in stop.cancelled {
            self.after_finished(finished);
        }
    }

    fn after_finished(&mut self, finished: Finished) {
        let object = finished.key.object;
        if finished.activation_finished {
            self.request_listeners
                .notify(&Notification::TriggerFinished {
                    object,
                    trigger: finished.trigger,
                    instance: finished.key.instance,
                    owner: finished.owner,
                });
        }
        if finished.object_drained && self.objects.take_release_pending(object) {
            info!(object = %object, "Object can be released");
            self.request_listeners
                .notify(&Notification::ObjectReleasable { object });
        }
    }

    /// Releases an object, unpreparing its prepared triggers first.
    fn release_object(&mut self, id: ObjectId) -> Result<()> {
        let live = self.events.live_count(id);
        if live == 0 && !id.is_global() {
            if let Ok(object) = self.objects.get(id) {
                for trigger in self.controls.triggers().filter(|t| object.is_prepared(t.id())) {
                    for data in trigger.entries() {
                        if let Err(e) = self.middleware.unprepare_trigger(id, data) {
                            warn!(object = %id, trigger = %trigger.id(), err = %e, "Unable to unprepare trigger");
                        }
                    }
                }
            }
        }
        self.objects.release(&mut self.middleware, id, live)
    }

    /// Clears the control data of a scope. Triggers of that scope still prepared on an object
    /// are unprepared first, as they can't be looked up afterwards.
    fn clear_controls(&mut self, scope: DataScope) -> usize {
        let triggers: Vec<TriggerId> = self
            .controls
            .triggers()
            .filter(|t| t.scope() == scope)
            .map(|t| t.id())
            .collect();
        for id in self.objects.ids() {
            for trigger_id in triggers.iter().copied() {
                let Ok(object) = self.objects.get_mut(id) else {
                    continue;
                };
                if !object.mark_unprepared(trigger_id) {
                    continue;
                }
                let Ok(trigger) = self.controls.trigger(trigger_id) else {
                    continue;
                };
                for data in trigger.entries() {
                    if let Err(e) = self.middleware.unprepare_trigger(id, data) {
                        warn!(object = %id, trigger = %trigger_id, err = %e, "Unable to unprepare trigger");
                    }
                }
            }
        }
        self.controls.clear_controls_data(scope)
    }

    fn set_rtpc(&mut self, object: ObjectId, id: RtpcId, value: f32) -> Result<()> {
        let rtpc = self.controls.rtpc(id)?;
        let middleware = &mut self.middleware;
        forward_entries(rtpc.entries(), |data| middleware.set_rtpc(object, data, value))?;
        self.objects.get_mut(object)?.set_rtpc(id, value);
        Ok(())
    }

    fn set_switch_state(
        &mut self,
        object: ObjectId,
        switch: SwitchId,
        state: SwitchStateId,
    ) -> Result<()> {
        let switch_state = self.controls.switch_state(switch, state)?;
        let middleware = &mut self.middleware;
        forward_entries(switch_state.entries(), |data| {
            middleware.set_switch_state(object, data)
        })?;
        self.objects.get_mut(object)?.set_switch_state(switch, state);
        Ok(())
    }

    fn set_environment(
        &mut self,
        object: ObjectId,
        id: EnvironmentId,
        amount: f32,
    ) -> Result<()> {
        let environment = self.controls.environment(id)?;
        let middleware = &mut self.middleware;
        forward_entries(environment.entries(), |data| {
            middleware.set_environment(object, data, amount)
        })?;
        self.objects.get_mut(object)?.set_environment(id, amount);
        Ok(())
    }

    fn change_state(&mut self, next: SystemState) -> Result<()> {
        let current = self.state.get();
        if !current.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: current,
                to: next,
            });
        }
        match next {
            SystemState::Muted => self.middleware.mute()?,
            SystemState::Running => self.middleware.unmute()?,
            SystemState::ShuttingDown => {}
        }
        self.state.transition(next)?;
        info!(from = ?current, to = ?next, "System state changed");
        Ok(())
    }

    /// Parses both the control and the preload data found in a folder.
    fn parse_data(&mut self, folder: &Path, scope: DataScope) -> Result<()> {
        self.controls
            .parse_controls_data(&self.middleware, folder, scope)?;
        self.file_cache.parse_preloads_data(folder, scope)?;
        Ok(())
    }

    fn refresh(&mut self, controls_folder: &Path, level_folder: Option<&Path>) -> Result<()> {
        info!(controls = ?controls_folder, level = ?level_folder, "Refreshing audio system");
        let stop = self.events.stop_everything();
        self.apply_stop(stop);

        for scope in [DataScope::LevelSpecific, DataScope::Global] {
            self.file_cache
                .clear_preloads_data(&mut self.middleware, scope);
            self.clear_controls(scope);
        }

        self.parse_data(controls_folder, DataScope::Global)?;
        if let Some(level_folder) = level_folder {
            self.parse_data(level_folder, DataScope::LevelSpecific)?;
        }
        Ok(())
    }

    /// Shuts the translation layer down: blocks new work, drains the queue, stops every event,
    /// then releases the file cache and events before objects and listeners, and finally the
    /// middleware.
    pub fn shut_down(&mut self) -> Result<()> {
        let span = span!(Level::INFO, "atl shut down");
        let _enter = span.enter();

        self.state.transition(SystemState::ShuttingDown)?;
        info!("Shutting down");

        let drained = self.drain_queue();
        let stop = self.events.stop_everything();
        let stopped = stop.stopping.len();
        self.apply_stop(stop);
        // Completions the middleware reported while stopping.
        self.drain_queue();
        info!(drained, stopped, "Outstanding work finished");

        self.file_cache.release(&mut self.middleware);
        self.events.release();
        self.sources.release(&mut self.middleware);
        self.objects.release_all(&mut self.middleware);
        self.listeners.release_all(&mut self.middleware);
        self.discard_queue();

        let result = self.middleware.shut_down();
        self.middleware.release();
        self.request_listeners.clear();
        self.released = true;
        info!("Shut down complete");
        result.map_err(Into::into)
    }

    /// Refuses everything still queued. Waiting callers get [`Error::ShuttingDown`].
    fn discard_queue(&mut self) -> usize {
        let mut discarded = 0;
        while let Some(mut queued) = self.queue.try_pop() {
            debug!(kind = ?queued.request.kind(), "Dropping request queued during shut down");
            queued.request.reply(&Err(Error::ShuttingDown));
            discarded += 1;
        }
        discarded
    }

    pub fn add_request_listener(
        &mut self,
        filter: RequestFilter,
        callback: Callback,
    ) -> ListenerHandle {
        self.request_listeners.add(filter, callback)
    }

    pub fn remove_request_listener(&mut self, handle: ListenerHandle) -> bool {
        self.request_listeners.remove(handle)
    }

    pub fn trigger_id(&self, name: &str) -> Result<TriggerId> {
        self.controls
            .trigger(TriggerId::from_name(name))
            .map(|t| t.id())
    }

    pub fn rtpc_id(&self, name: &str) -> Result<RtpcId> {
        self.controls.rtpc(RtpcId::from_name(name)).map(|r| r.id())
    }

    pub fn switch_id(&self, name: &str) -> Result<SwitchId> {
        self.controls
            .switch(SwitchId::from_name(name))
            .map(|s| s.id())
    }

    pub fn switch_state_id(&self, switch: SwitchId, name: &str) -> Result<SwitchStateId> {
        self.controls
            .switch_state(switch, SwitchStateId::from_name(name))
            .map(|s| s.id())
    }

    pub fn preload_id(&self, name: &str) -> Result<PreloadId> {
        self.file_cache.preload_id(name)
    }

    pub fn environment_id(&self, name: &str) -> Result<EnvironmentId> {
        self.controls
            .environment(EnvironmentId::from_name(name))
            .map(|e| e.id())
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn snapshot(&self) -> &TickSnapshot {
        &self.snapshot
    }

    pub fn objects(&self) -> &ObjectManager {
        &self.objects
    }

    pub fn listeners(&self) -> &ListenerManager {
        &self.listeners
    }

    pub fn events(&self) -> &EventManager {
        &self.events
    }

    pub fn file_cache(&self) -> &FileCacheManager {
        &self.file_cache
    }

    pub fn sources(&self) -> &SourceManager {
        &self.sources
    }

    pub fn controls(&self) -> &ControlDataProcessor<M> {
        &self.controls
    }

    pub fn middleware(&self) -> &M {
        &self.middleware
    }

    /// Number of requests waiting for the next update.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Forwards a call to the middleware for every implementation entry. Fails only if there were
/// entries and all of them failed.
fn forward_entries<D>(
    entries: &[D],
    mut call: impl FnMut(&D) -> MiddlewareResult<()>,
) -> Result<()> {
    let mut succeeded = entries.is_empty();
    let mut last_error = None;
    for entry in entries {
        match call(entry) {
            Ok(()) => succeeded = true,
            Err(e) => {
                warn!(err = %e, "Middleware rejected implementation entry");
                last_error = Some(e);
            }
        }
    }
    match last_error {
        Some(e) if !succeeded => Err(e.into()),
        _ => Ok(()),
    }
}
