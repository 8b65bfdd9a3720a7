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
//! The threaded front end: owns the audio thread that ticks the translation layer and accepts
//! requests from any other thread.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Sender};
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{error, info, span, warn, Level};

use crate::atl::TranslationLayer;
use crate::config::AtlConfig;
use crate::error::{Error, Result};
use crate::ids::{EnvironmentId, PreloadId, RtpcId, SwitchId, SwitchStateId, TriggerId};
use crate::middleware::Middleware;
use crate::request::{ManagerRequest, Request, RequestOutcome, RequestResult, RequestSender};
use crate::request_listeners::{Callback, ListenerHandle, RequestFilter};

const AUDIO_THREAD_NAME: &str = "atl-audio";

pub struct AudioSystem {
    sender: RequestSender,
    stop: Sender<()>,
    join_handle: Option<JoinHandle<Result<()>>>,
}

impl AudioSystem {
    /// Builds and initializes a translation layer for the middleware, then starts the audio
    /// thread.
    pub fn start<M: Middleware>(middleware: M, config: &AtlConfig) -> Result<AudioSystem> {
        let mut layer = TranslationLayer::new(middleware, config);
        layer.initialize()?;
        AudioSystem::run(layer, config)
    }

    /// Moves an initialized translation layer onto the audio thread. From then on the layer is
    /// only reachable through requests, see [`AudioSystem::add_request_listener`].
    pub fn run<M: Middleware>(
        mut layer: TranslationLayer<M>,
        config: &AtlConfig,
    ) -> Result<AudioSystem> {
        let interval = config
            .tick_interval()
            .map_err(|e| Error::Config(e.to_string()))?;
        let priority = config.audio_thread_priority();
        let sender = layer.sender();
        let (stop, stop_rx) = crossbeam_channel::bounded::<()>(1);

        let join_handle = thread::Builder::new()
            .name(AUDIO_THREAD_NAME.to_string())
            .spawn(move || {
                let span = span!(Level::INFO, "audio thread");
                let _enter = span.enter();

                if let Some(priority) = priority {
                    raise_priority(priority);
                }
                info!(interval = ?interval, "Audio thread started");

                let ticker = crossbeam_channel::tick(interval);
                let mut last_tick = Instant::now();
                loop {
                    select! {
                        recv(ticker) -> tick => {
                            let now = tick.unwrap_or_else(|_| Instant::now());
                            layer.update(now.saturating_duration_since(last_tick));
                            last_tick = now;
                        },
                        recv(stop_rx) -> _ => break,
                    }
                }

                let result = layer.shut_down();
                info!("Audio thread stopped");
                result
            })
            .map_err(|e| Error::Thread(format!("unable to start audio thread: {}", e)))?;

        Ok(AudioSystem {
            sender,
            stop,
            join_handle: Some(join_handle),
        })
    }

    /// Queues a request without waiting for it.
    pub fn push_request(&self, request: Request) -> Result<()> {
        self.sender.push(request)
    }

    /// Queues a request and waits until the audio thread has processed it.
    pub fn push_request_blocking(&self, request: Request) -> RequestResult {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.sender.push(request.with_reply(tx))?;
        rx.recv().map_err(|_| Error::QueueDisconnected)?
    }

    /// Like [`AudioSystem::push_request_blocking`], giving up after `timeout`.
    pub fn push_request_timeout(&self, request: Request, timeout: Duration) -> RequestResult {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.sender.push(request.with_reply(tx))?;
        rx.recv_timeout(timeout)
            .map_err(|_| Error::QueueDisconnected)?
    }

    pub fn sender(&self) -> RequestSender {
        self.sender.clone()
    }

    /// Registers a request listener on the audio thread, waiting until it is in place.
    pub fn add_request_listener(
        &self,
        filter: RequestFilter,
        callback: Callback,
    ) -> Result<ListenerHandle> {
        let request = Request::new(ManagerRequest::add_request_listener(filter, callback));
        match self.push_request_blocking(request)? {
            RequestOutcome::RequestListenerAdded(handle) => Ok(handle),
            outcome => Err(Error::Thread(format!(
                "unexpected outcome {:?} while adding a request listener",
                outcome
            ))),
        }
    }

    pub fn remove_request_listener(&self, handle: ListenerHandle) -> Result<()> {
        self.push_request_blocking(Request::new(ManagerRequest::RemoveRequestListener(handle)))?;
        Ok(())
    }

    pub fn trigger_id(&self, name: &str) -> TriggerId {
        TriggerId::from_name(name)
    }

    pub fn rtpc_id(&self, name: &str) -> RtpcId {
        RtpcId::from_name(name)
    }

    pub fn switch_id(&self, name: &str) -> SwitchId {
        SwitchId::from_name(name)
    }

    pub fn switch_state_id(&self, name: &str) -> SwitchStateId {
        SwitchStateId::from_name(name)
    }

    pub fn preload_id(&self, name: &str) -> PreloadId {
        PreloadId::from_name(name)
    }

    pub fn environment_id(&self, name: &str) -> EnvironmentId {
        EnvironmentId::from_name(name)
    }

    /// Stops the audio thread after running the translation layer's shut down.
    pub fn shut_down(mut self) -> Result<()> {
        self.stop_thread()
    }

    fn stop_thread(&mut self) -> Result<()> {
        let Some(join_handle) = self.join_handle.take() else {
            return Ok(());
        };
        let _ = self.stop.send(());
        match join_handle.join() {
            Ok(result) => result,
            Err(_) => {
                error!("Audio thread panicked");
                Err(Error::Thread("audio thread panicked".to_string()))
            }
        }
    }
}

impl Drop for AudioSystem {
    fn drop(&mut self) {
        if let Err(e) = self.stop_thread() {
            warn!(err = %e, "Error while stopping the audio system");
        }
    }
}

fn raise_priority(priority: u8) {
    let Ok(value) = ThreadPriorityValue::try_from(priority) else {
        warn!(priority, "Invalid audio thread priority");
        return;
    };
    match set_current_thread_priority(ThreadPriority::Crossplatform(value)) {
        Ok(()) => info!(priority, "Raised audio thread priority"),
        Err(e) => warn!(priority, err = ?e, "Unable to raise audio thread priority"),
    }
}
