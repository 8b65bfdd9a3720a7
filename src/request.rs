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
//! Requests accepted by the translation layer and the queue that carries them onto the audio
//! thread.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::error::{Error, Result};
use crate::ids::{
    DataScope, EnvironmentId, EventKey, ListenerId, ObjectId, OwnerId, PreloadId, RtpcId,
    SourceId, SwitchId, SwitchStateId, TriggerId, TriggerInstanceId,
};
use crate::math::Transform;
use crate::request_listeners::{Callback, ListenerHandle, NewRequestListener, RequestFilter};
use crate::sources::AudioInputConfig;
use crate::state::SharedState;

/// Requests that manage the translation layer itself.
#[derive(Debug)]
pub enum ManagerRequest {
    /// Reserves an object handle. The name is only kept for diagnostics.
    ReserveObject { name: Option<String> },
    ReleaseObject(ObjectId),
    ReserveListener,
    ReleaseListener(ListenerId),
    /// Designates the override listener, or clears it with `None`.
    SetOverrideListener(Option<ListenerId>),
    ParseControlsData { folder: PathBuf, scope: DataScope },
    ClearControlsData(DataScope),
    ParsePreloadsData { folder: PathBuf, scope: DataScope },
    ClearPreloadsData(DataScope),
    PreloadSingleRequest(PreloadId),
    UnloadSingleRequest(PreloadId),
    /// Stops everything, clears both scopes and reparses the given folders.
    RefreshAudioSystem {
        controls_folder: PathBuf,
        level_folder: Option<PathBuf>,
    },
    StopAllSounds,
    ChangeLanguage(String),
    Mute,
    Unmute,
    /// Registers a request listener on the audio thread.
    AddRequestListener(NewRequestListener),
    RemoveRequestListener(ListenerHandle),
    /// Creates an input source that triggers can stream from.
    CreateAudioSource(AudioInputConfig),
    DestroyAudioSource(SourceId),
}

impl ManagerRequest {
    pub fn add_request_listener(filter: RequestFilter, callback: Callback) -> ManagerRequest {
        ManagerRequest::AddRequestListener(NewRequestListener::new(filter, callback))
    }
}

/// Bytes read from a bank file.
#[derive(Clone)]
pub struct BankBytes(pub Arc<Vec<u8>>);

impl fmt::Debug for BankBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BankBytes({} bytes)", self.0.len())
    }
}

/// Asynchronous completions, marshalled back onto the audio thread.
#[derive(Debug, Clone)]
pub enum CallbackRequest {
    /// The middleware finished playing an event.
    EventFinished(EventKey),
    /// A bank read issued by the file cache has completed.
    BankRead {
        preload: PreloadId,
        /// Identifies the load that issued the read, so that stale reads can be dropped.
        ticket: u64,
        bank: usize,
        result: std::result::Result<BankBytes, String>,
    },
}

/// Operations addressed to a single object.
#[derive(Debug, Clone)]
pub enum ObjectRequest {
    PrepareTrigger(TriggerId),
    UnprepareTrigger(TriggerId),
    /// Activates a trigger. A non-zero delay defers the start of its events, and a source
    /// feeds them from an audio input created with [`ManagerRequest::CreateAudioSource`].
    ExecuteTrigger {
        trigger: TriggerId,
        delay: Duration,
        source: Option<SourceId>,
    },
    StopTrigger(TriggerId),
    /// Stops every trigger on the object, or only those started by the request's owner.
    StopAllTriggers { owner_only: bool },
    SetPosition(Transform),
    SetRtpcValue { rtpc: RtpcId, value: f32 },
    ResetRtpcs,
    SetSwitchState { switch: SwitchId, state: SwitchStateId },
    SetEnvironmentAmount {
        environment: EnvironmentId,
        amount: f32,
    },
    ResetEnvironments,
}

/// Operations addressed to a single listener.
#[derive(Debug, Clone)]
pub enum ListenerRequest {
    SetTransform(Transform),
}

#[derive(Debug)]
pub enum RequestData {
    Manager(ManagerRequest),
    Callback(CallbackRequest),
    Object {
        object: ObjectId,
        request: ObjectRequest,
    },
    Listener {
        listener: ListenerId,
        request: ListenerRequest,
    },
}

impl RequestData {
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestData::Manager(_) => RequestKind::Manager,
            RequestData::Callback(_) => RequestKind::Callback,
            RequestData::Object { .. } => RequestKind::Object,
            RequestData::Listener { .. } => RequestKind::Listener,
        }
    }
}

impl From<ManagerRequest> for RequestData {
    fn from(request: ManagerRequest) -> Self {
        RequestData::Manager(request)
    }
}

impl From<CallbackRequest> for RequestData {
    fn from(request: CallbackRequest) -> Self {
        RequestData::Callback(request)
    }
}

/// The discriminant of [`RequestData`], used for listener filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Manager,
    Callback,
    Object,
    Listener,
}

/// What a successfully processed request produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestOutcome {
    Done,
    /// The request was accepted and completes asynchronously (e.g. a bank load).
    Pending,
    ObjectReserved(ObjectId),
    ListenerReserved(ListenerId),
    TriggerActivated(TriggerInstanceId),
    RequestListenerAdded(ListenerHandle),
    SourceCreated(SourceId),
}

pub type RequestResult = std::result::Result<RequestOutcome, Error>;

/// A request plus its routing metadata.
#[derive(Debug)]
pub struct Request {
    pub data: RequestData,
    pub owner: Option<OwnerId>,
    reply: Option<Sender<RequestResult>>,
}

impl Request {
    pub fn new(data: impl Into<RequestData>) -> Request {
        Request {
            data: data.into(),
            owner: None,
            reply: None,
        }
    }

    pub fn object(object: ObjectId, request: ObjectRequest) -> Request {
        Request::new(RequestData::Object { object, request })
    }

    pub fn listener(listener: ListenerId, request: ListenerRequest) -> Request {
        Request::new(RequestData::Listener { listener, request })
    }

    pub fn with_owner(mut self, owner: OwnerId) -> Request {
        self.owner = Some(owner);
        self
    }

    /// Attaches a reply channel that receives the result once the request is processed.
    pub fn with_reply(mut self, reply: Sender<RequestResult>) -> Request {
        self.reply = Some(reply);
        self
    }

    pub fn kind(&self) -> RequestKind {
        self.data.kind()
    }

    /// Sends the result to the reply channel, if any. A caller that stopped waiting is fine.
    pub(crate) fn reply(&mut self, result: &RequestResult) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(result.clone());
        }
    }
}

/// Delivered to request listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A request has been fully applied (or rejected).
    RequestCompleted {
        kind: RequestKind,
        owner: Option<OwnerId>,
        result: RequestResult,
    },
    /// All events of a trigger activation have finished or were stopped.
    TriggerFinished {
        object: ObjectId,
        trigger: TriggerId,
        instance: TriggerInstanceId,
        owner: Option<OwnerId>,
    },
    PreloadLoaded {
        preload: PreloadId,
    },
    PreloadFailed {
        preload: PreloadId,
        reason: String,
    },
    /// An object whose release was refused has no more live events.
    ObjectReleasable {
        object: ObjectId,
    },
}

impl Notification {
    pub fn kind(&self) -> RequestKind {
        match self {
            Notification::RequestCompleted { kind, .. } => *kind,
            _ => RequestKind::Callback,
        }
    }

    pub fn owner(&self) -> Option<OwnerId> {
        match self {
            Notification::RequestCompleted { owner, .. } => *owner,
            Notification::TriggerFinished { owner, .. } => *owner,
            _ => None,
        }
    }
}

/// A request with the admission decision taken when it was pushed.
#[derive(Debug)]
pub(crate) struct Queued {
    pub request: Request,
    pub admitted: bool,
}

/// The thread-safe queue drained once per tick by the translation layer.
pub(crate) struct RequestQueue {
    tx: Sender<Queued>,
    rx: Receiver<Queued>,
    state: SharedState,
}

impl RequestQueue {
    pub fn new(state: SharedState) -> RequestQueue {
        let (tx, rx) = crossbeam_channel::unbounded();
        RequestQueue { tx, rx, state }
    }

    pub fn sender(&self) -> RequestSender {
        RequestSender {
            tx: self.tx.clone(),
            state: self.state.clone(),
        }
    }

    /// Returns the next queued request without blocking.
    pub fn try_pop(&self) -> Option<Queued> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

/// A cloneable handle for pushing requests from any thread.
#[derive(Clone)]
pub struct RequestSender {
    tx: Sender<Queued>,
    state: SharedState,
}

impl RequestSender {
    /// Queues a request. Once the system is shutting down, manager, object and listener requests
    /// are refused here. Refused requests are still queued so that listeners and reply channels
    /// learn about the rejection on the audio thread.
    pub fn push(&self, request: Request) -> Result<()> {
        let admitted = request.kind() == RequestKind::Callback || self.state.can_process_requests();
        self.tx
            .send(Queued { request, admitted })
            .map_err(|_| Error::QueueDisconnected)?;
        if admitted {
            Ok(())
        } else {
            Err(Error::ShuttingDown)
        }
    }

    pub fn can_process_requests(&self) -> bool {
        self.state.can_process_requests()
    }
}

impl fmt::Debug for RequestSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSender")
            .field("state", &self.state.get())
            .finish()
    }
}

/// Handed to the middleware so that completions arriving on backend threads are queued instead
/// of being applied in place.
#[derive(Clone, Debug)]
pub struct CompletionSender(RequestSender);

impl CompletionSender {
    pub(crate) fn new(sender: RequestSender) -> CompletionSender {
        CompletionSender(sender)
    }

    pub fn event_finished(&self, key: EventKey) -> Result<()> {
        self.push(CallbackRequest::EventFinished(key))
    }

    pub fn push(&self, callback: CallbackRequest) -> Result<()> {
        self.0.push(Request::new(callback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SystemState;

    #[test]
    fn test_push_is_gated_by_state() {
        let state = SharedState::new();
        let queue = RequestQueue::new(state.clone());
        let sender = queue.sender();

        assert!(sender.push(Request::new(ManagerRequest::StopAllSounds)).is_ok());
        state.transition(SystemState::ShuttingDown).unwrap();
        assert_eq!(
            sender.push(Request::new(ManagerRequest::StopAllSounds)),
            Err(Error::ShuttingDown)
        );

        let first = queue.try_pop().unwrap();
        assert!(first.admitted);
        let second = queue.try_pop().unwrap();
        assert!(!second.admitted);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_callbacks_are_admitted_while_shutting_down() {
        let state = SharedState::new();
        let queue = RequestQueue::new(state.clone());
        let completions = CompletionSender::new(queue.sender());
        state.transition(SystemState::ShuttingDown).unwrap();

        let key = EventKey {
            object: ObjectId::GLOBAL,
            instance: TriggerInstanceId::from_raw(1),
            entry: 0,
        };
        assert!(completions.event_finished(key).is_ok());
        assert!(queue.try_pop().unwrap().admitted);
    }

    #[test]
    fn test_reply_is_sent_once() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut request = Request::new(ManagerRequest::Mute).with_reply(tx);
        request.reply(&Ok(RequestOutcome::Done));
        request.reply(&Ok(RequestOutcome::Pending));
        assert_eq!(rx.try_recv(), Ok(Ok(RequestOutcome::Done)));
        assert!(rx.try_recv().is_err());
    }
}
