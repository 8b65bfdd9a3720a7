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
//! The file cache manager: preload requests, the banks they hold in memory, and the background
//! reader that fetches bank files off the audio thread.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::{debug, error, info, span, warn, Level};

use crate::config;
use crate::error::{Error, Result};
use crate::ids::{ControlKind, DataScope, PreloadId};
use crate::middleware::Middleware;
use crate::request::{BankBytes, CallbackRequest, CompletionSender, Notification};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PreloadState {
    Unloaded,
    Loading,
    Loaded,
}

/// What a load request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// The preload is in memory.
    Loaded,
    /// Reads are in flight; the outcome is reported with a notification.
    Loading,
}

/// A named set of banks loaded and unloaded together.
#[derive(Debug)]
pub struct PreloadRequest {
    id: PreloadId,
    name: String,
    scope: DataScope,
    auto_load: bool,
    /// Bank files, resolved against the folder the preload was parsed from.
    banks: Vec<PathBuf>,
    state: PreloadState,
    ref_count: u32,
    /// Identifies the current load. Reads carrying another ticket are stale.
    ticket: u64,
    /// Reads of the current load that haven't come back yet.
    outstanding: usize,
    /// Bank contents registered with the middleware, by bank index.
    loaded: Vec<Option<BankBytes>>,
    /// The first failure of the current load.
    failure: Option<String>,
}

impl PreloadRequest {
    pub fn id(&self) -> PreloadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> DataScope {
        self.scope
    }

    pub fn auto_load(&self) -> bool {
        self.auto_load
    }

    pub fn banks(&self) -> &[PathBuf] {
        &self.banks
    }

    pub fn state(&self) -> PreloadState {
        self.state
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Bytes currently held in memory for this preload.
    pub fn memory(&self) -> usize {
        self.loaded.iter().flatten().map(|bank| bank.0.len()).sum()
    }

    /// Unregisters every bank from the middleware and drops the cached bytes.
    fn unregister_banks<M: Middleware>(&mut self, middleware: &mut M) {
        for (index, bank) in self.loaded.iter_mut().enumerate() {
            if bank.take().is_some() {
                if let Err(e) = middleware.unregister_bank(self.id, &self.banks[index]) {
                    warn!(preload = self.name, bank = ?self.banks[index], err = %e, "Unable to unregister bank");
                }
            }
        }
    }
}

struct ReadJob {
    preload: PreloadId,
    ticket: u64,
    bank: usize,
    path: PathBuf,
}

/// Reads bank files on a dedicated thread and queues the results as callback requests.
struct BankReader {
    jobs: Sender<ReadJob>,
    join_handle: JoinHandle<()>,
}

impl BankReader {
    fn start(completions: CompletionSender) -> Result<BankReader> {
        let (jobs, rx) = crossbeam_channel::unbounded::<ReadJob>();
        let join_handle = thread::Builder::new()
            .name("atl-bank-reader".to_string())
            .spawn(move || {
                let span = span!(Level::INFO, "bank reader");
                let _enter = span.enter();

                for job in rx {
                    let result = fs::read(&job.path)
                        .map(|bytes| BankBytes(Arc::new(bytes)))
                        .map_err(|e| format!("{}: {}", job.path.display(), e));
                    debug!(path = ?job.path, ok = result.is_ok(), "Bank read");

                    let callback = CallbackRequest::BankRead {
                        preload: job.preload,
                        ticket: job.ticket,
                        bank: job.bank,
                        result,
                    };
                    if let Err(e) = completions.push(callback) {
                        error!(err = %e, "Unable to deliver bank read, stopping reader");
                        return;
                    }
                }
            })
            .map_err(|e| Error::Thread(format!("unable to start bank reader: {}", e)))?;

        Ok(BankReader { jobs, join_handle })
    }

    fn read(&self, job: ReadJob) -> Result<()> {
        self.jobs.send(job).map_err(|_| Error::QueueDisconnected)
    }

    fn stop(self) {
        drop(self.jobs);
        if self.join_handle.join().is_err() {
            error!("Bank reader thread panicked");
        }
    }
}

pub struct FileCacheManager {
    preloads: HashMap<PreloadId, PreloadRequest>,
    reader: Option<BankReader>,
    next_ticket: u64,
}

impl FileCacheManager {
    pub fn new() -> FileCacheManager {
        FileCacheManager {
            preloads: HashMap::new(),
            reader: None,
            next_ticket: 1,
        }
    }

    /// Starts the background reader. Read results are queued through `completions`.
    pub fn initialize(&mut self, completions: CompletionSender) -> Result<()> {
        if self.reader.is_none() {
            self.reader = Some(BankReader::start(completions)?);
        }
        Ok(())
    }

    /// Registers every preload defined in the folder under the given scope, then loads the
    /// auto-load ones. Returns the ids of the registered preloads.
    pub fn parse_preloads_data(&mut self, folder: &Path, scope: DataScope) -> Result<Vec<PreloadId>> {
        let files = config::read_control_files(folder).map_err(|e| Error::ControlData {
            path: folder.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut registered = Vec::new();
        for (_, file) in files {
            for definition in file.preloads() {
                let id = PreloadId::from_name(definition.name());
                if let Some(existing) = self.preloads.get(&id) {
                    warn!(
                        preload = definition.name(),
                        existing = existing.name,
                        id = %id,
                        "Preload already registered, keeping the first definition"
                    );
                    continue;
                }

                let banks: Vec<PathBuf> = definition.banks().iter().map(|b| folder.join(b)).collect();
                self.preloads.insert(
                    id,
                    PreloadRequest {
                        id,
                        name: definition.name().to_string(),
                        scope,
                        auto_load: definition.auto_load(),
                        loaded: vec![None; banks.len()],
                        banks,
                        state: PreloadState::Unloaded,
                        ref_count: 0,
                        ticket: 0,
                        outstanding: 0,
                        failure: None,
                    },
                );
                registered.push(id);
            }
        }

        for id in registered.iter() {
            if self.preloads.get(id).is_some_and(|p| p.auto_load) {
                if let Err(e) = self.load(*id) {
                    error!(preload = %id, err = %e, "Unable to auto load preload");
                }
            }
        }

        info!(folder = ?folder, scope = %scope, preloads = registered.len(), "Preloads parsed");
        Ok(registered)
    }

    /// Unloads and forgets every preload registered under exactly this scope.
    pub fn clear_preloads_data<M: Middleware>(&mut self, middleware: &mut M, scope: DataScope) -> usize {
        let ids: Vec<PreloadId> = self
            .preloads
            .values()
            .filter(|p| p.scope == scope)
            .map(|p| p.id)
            .collect();
        for id in ids.iter() {
            if let Some(mut preload) = self.preloads.remove(id) {
                preload.unregister_banks(middleware);
            }
        }
        info!(scope = %scope, removed = ids.len(), "Preloads cleared");
        ids.len()
    }

    /// Takes a reference on the preload, issuing the reads if it isn't in memory yet. A load
    /// issued while the preload is already loading shares the reads in flight.
    pub fn load(&mut self, id: PreloadId) -> Result<LoadStatus> {
        let preload = self.preloads.get_mut(&id).ok_or(Error::ControlNotFound {
            kind: ControlKind::Preload,
            id: id.raw(),
        })?;

        match preload.state {
            PreloadState::Loaded => {
                preload.ref_count += 1;
                Ok(LoadStatus::Loaded)
            }
            PreloadState::Loading => {
                preload.ref_count += 1;
                debug!(preload = preload.name, refs = preload.ref_count, "Load coalesced");
                Ok(LoadStatus::Loading)
            }
            PreloadState::Unloaded => {
                if preload.banks.is_empty() {
                    preload.ref_count = 1;
                    preload.state = PreloadState::Loaded;
                    return Ok(LoadStatus::Loaded);
                }

                let reader = self.reader.as_ref().ok_or(Error::QueueDisconnected)?;
                let ticket = self.next_ticket;
                self.next_ticket += 1;

                for (bank, path) in preload.banks.iter().enumerate() {
                    reader.read(ReadJob {
                        preload: id,
                        ticket,
                        bank,
                        path: path.clone(),
                    })?;
                }

                preload.ticket = ticket;
                preload.outstanding = preload.banks.len();
                preload.failure = None;
                preload.ref_count = 1;
                preload.state = PreloadState::Loading;
                info!(preload = preload.name, banks = preload.banks.len(), "Loading preload");
                Ok(LoadStatus::Loading)
            }
        }
    }

    /// Drops a reference on the preload. The last reference unregisters its banks; if reads are
    /// still in flight the banks are dropped once they complete.
    pub fn unload<M: Middleware>(&mut self, middleware: &mut M, id: PreloadId) -> Result<()> {
        let preload = self.preloads.get_mut(&id).ok_or(Error::ControlNotFound {
            kind: ControlKind::Preload,
            id: id.raw(),
        })?;

        if preload.ref_count == 0 {
            debug!(preload = preload.name, "Preload is not loaded");
            return Ok(());
        }
        preload.ref_count -= 1;
        if preload.ref_count == 0 && preload.state == PreloadState::Loaded {
            preload.unregister_banks(middleware);
            preload.state = PreloadState::Unloaded;
            info!(preload = preload.name, "Preload unloaded");
        }
        Ok(())
    }

    /// Applies a completed bank read. Returns the notification to deliver once the whole
    /// preload has settled.
    pub fn handle_bank_read<M: Middleware>(
        &mut self,
        middleware: &mut M,
        id: PreloadId,
        ticket: u64,
        bank: usize,
        result: std::result::Result<BankBytes, String>,
    ) -> Option<Notification> {
        let preload = match self.preloads.get_mut(&id) {
            Some(preload)
                if preload.state == PreloadState::Loading
                    && preload.ticket == ticket
                    && bank < preload.banks.len() =>
            {
                preload
            }
            _ => {
                debug!(preload = %id, ticket, "Dropping stale bank read");
                return None;
            }
        };

        preload.outstanding = preload.outstanding.saturating_sub(1);
        match result {
            Ok(bytes) => {
                match middleware.register_bank(id, &preload.banks[bank], &bytes.0) {
                    Ok(()) => preload.loaded[bank] = Some(bytes),
                    Err(e) => {
                        preload.failure.get_or_insert(e.to_string());
                    }
                }
            }
            Err(reason) => {
                preload.failure.get_or_insert(reason);
            }
        }

        if preload.outstanding > 0 {
            return None;
        }

        if let Some(reason) = preload.failure.take() {
            preload.unregister_banks(middleware);
            preload.state = PreloadState::Unloaded;
            preload.ref_count = 0;
            error!(preload = %preload.name, reason = %reason, "Preload failed to load");
            return Some(Notification::PreloadFailed { preload: id, reason });
        }

        if preload.ref_count == 0 {
            // Unloaded while the reads were in flight.
            preload.unregister_banks(middleware);
            preload.state = PreloadState::Unloaded;
            debug!(preload = preload.name, "Preload unloaded before it finished loading");
            return None;
        }

        preload.state = PreloadState::Loaded;
        info!(preload = preload.name, bytes = preload.memory(), "Preload loaded");
        Some(Notification::PreloadLoaded { preload: id })
    }

    pub fn preload_id(&self, name: &str) -> Result<PreloadId> {
        let id = PreloadId::from_name(name);
        if self.preloads.contains_key(&id) {
            Ok(id)
        } else {
            Err(Error::ControlNotFound {
                kind: ControlKind::Preload,
                id: id.raw(),
            })
        }
    }

    pub fn get(&self, id: PreloadId) -> Option<&PreloadRequest> {
        self.preloads.get(&id)
    }

    pub fn preloads(&self) -> impl Iterator<Item = &PreloadRequest> {
        self.preloads.values()
    }

    /// Total bytes of bank data held in memory.
    pub fn memory(&self) -> usize {
        self.preloads.values().map(PreloadRequest::memory).sum()
    }

    /// Unregisters every bank, forgets every preload and stops the reader.
    pub fn release<M: Middleware>(&mut self, middleware: &mut M) {
        for preload in self.preloads.values_mut() {
            preload.unregister_banks(middleware);
        }
        self.preloads.clear();
        if let Some(reader) = self.reader.take() {
            reader.stop();
        }
    }
}

impl Default for FileCacheManager {
    fn default() -> Self {
        FileCacheManager::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::{ControlsFile, PreloadDefinition};
    use crate::middleware::mock::MockMiddleware;
    use crate::request::{RequestData, RequestQueue};
    use crate::state::SharedState;

    struct Fixture {
        cache: FileCacheManager,
        queue: RequestQueue,
        mock: MockMiddleware,
        dir: tempfile::TempDir,
    }

    fn fixture(preloads: Vec<PreloadDefinition>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("level.bank"), b"level bank").unwrap();
        fs::write(dir.path().join("music.bank"), b"music").unwrap();
        fs::write(dir.path().join("empty.bank"), b"").unwrap();
        ControlsFile::new(vec![], vec![], vec![], vec![], preloads)
            .save(&dir.path().join("preloads.yaml"))
            .unwrap();

        let queue = RequestQueue::new(SharedState::new());
        let mut cache = FileCacheManager::new();
        cache
            .initialize(CompletionSender::new(queue.sender()))
            .unwrap();
        Fixture {
            cache,
            queue,
            mock: MockMiddleware::new("mock"),
            dir,
        }
    }

    /// Waits for bank reads and applies them, returning the notifications produced.
    fn pump_reads(fixture: &mut Fixture, reads: usize) -> Vec<Notification> {
        let mut notifications = Vec::new();
        for _ in 0..reads {
            let mut queued = None;
            for _ in 0..200 {
                queued = fixture.queue.try_pop();
                if queued.is_some() {
                    break;
                }
                thread::sleep(Duration::from_millis(5));
            }
            let queued = queued.expect("bank read never arrived");
            if let RequestData::Callback(CallbackRequest::BankRead {
                preload,
                ticket,
                bank,
                result,
            }) = queued.request.data
            {
                notifications.extend(fixture.cache.handle_bank_read(
                    &mut fixture.mock,
                    preload,
                    ticket,
                    bank,
                    result,
                ));
            }
        }
        notifications
    }

    fn level_preload() -> PreloadDefinition {
        PreloadDefinition::new(
            "Level",
            false,
            vec!["level.bank".to_string(), "music.bank".to_string()],
        )
    }

    #[test]
    fn test_load_and_unload() {
        let mut f = fixture(vec![level_preload()]);
        let folder = f.dir.path().to_path_buf();
        f.cache
            .parse_preloads_data(&folder, DataScope::LevelSpecific)
            .unwrap();
        let id = f.cache.preload_id("Level").unwrap();

        assert_eq!(f.cache.load(id).unwrap(), LoadStatus::Loading);
        let notifications = pump_reads(&mut f, 2);
        assert_eq!(notifications, vec![Notification::PreloadLoaded { preload: id }]);
        assert_eq!(f.cache.get(id).unwrap().state(), PreloadState::Loaded);
        assert_eq!(f.cache.memory(), "level bank".len() + "music".len());
        assert_eq!(f.mock.handle().bank_count(), 2);

        f.cache.unload(&mut f.mock, id).unwrap();
        assert_eq!(f.cache.get(id).unwrap().state(), PreloadState::Unloaded);
        assert_eq!(f.cache.memory(), 0);
        assert_eq!(f.mock.handle().bank_count(), 0);
    }

    #[test]
    fn test_concurrent_loads_are_coalesced() {
        let mut f = fixture(vec![level_preload()]);
        let folder = f.dir.path().to_path_buf();
        f.cache
            .parse_preloads_data(&folder, DataScope::LevelSpecific)
            .unwrap();
        let id = f.cache.preload_id("Level").unwrap();

        assert_eq!(f.cache.load(id).unwrap(), LoadStatus::Loading);
        assert_eq!(f.cache.load(id).unwrap(), LoadStatus::Loading);
        assert_eq!(f.cache.get(id).unwrap().ref_count(), 2);

        let notifications = pump_reads(&mut f, 2);
        assert_eq!(notifications.len(), 1);
        // Only one read per bank was issued.
        thread::sleep(Duration::from_millis(20));
        assert!(f.queue.try_pop().is_none());

        assert_eq!(f.cache.load(id).unwrap(), LoadStatus::Loaded);
        f.cache.unload(&mut f.mock, id).unwrap();
        f.cache.unload(&mut f.mock, id).unwrap();
        assert_eq!(f.cache.get(id).unwrap().state(), PreloadState::Loaded);
        f.cache.unload(&mut f.mock, id).unwrap();
        assert_eq!(f.cache.get(id).unwrap().state(), PreloadState::Unloaded);
    }

    #[test]
    fn test_failed_load_reverts_and_reports_once() {
        let mut f = fixture(vec![PreloadDefinition::new(
            "Broken",
            false,
            vec![
                "level.bank".to_string(),
                "missing.bank".to_string(),
                "empty.bank".to_string(),
            ],
        )]);
        let folder = f.dir.path().to_path_buf();
        f.cache
            .parse_preloads_data(&folder, DataScope::Global)
            .unwrap();
        let id = f.cache.preload_id("Broken").unwrap();

        f.cache.load(id).unwrap();
        let notifications = pump_reads(&mut f, 3);
        assert_eq!(notifications.len(), 1);
        assert!(matches!(
            notifications[0],
            Notification::PreloadFailed { preload, .. } if preload == id
        ));

        let preload = f.cache.get(id).unwrap();
        assert_eq!(preload.state(), PreloadState::Unloaded);
        assert_eq!(preload.ref_count(), 0);
        // The bank that did load was unregistered again.
        assert_eq!(f.mock.handle().bank_count(), 0);

        // No retry.
        thread::sleep(Duration::from_millis(20));
        assert!(f.queue.try_pop().is_none());
    }

    #[test]
    fn test_unload_while_loading_drops_banks_on_completion() {
        let mut f = fixture(vec![level_preload()]);
        let folder = f.dir.path().to_path_buf();
        f.cache
            .parse_preloads_data(&folder, DataScope::Global)
            .unwrap();
        let id = f.cache.preload_id("Level").unwrap();

        f.cache.load(id).unwrap();
        f.cache.unload(&mut f.mock, id).unwrap();
        let notifications = pump_reads(&mut f, 2);
        assert!(notifications.is_empty());
        assert_eq!(f.cache.get(id).unwrap().state(), PreloadState::Unloaded);
        assert_eq!(f.mock.handle().bank_count(), 0);
    }

    #[test]
    fn test_auto_load_and_scoped_clear() {
        let mut f = fixture(vec![]);
        let global = tempfile::tempdir().unwrap();
        fs::write(global.path().join("common.bank"), b"common").unwrap();
        ControlsFile::new(
            vec![],
            vec![],
            vec![],
            vec![],
            vec![PreloadDefinition::new(
                "Common",
                true,
                vec!["common.bank".to_string()],
            )],
        )
        .save(&global.path().join("global.yaml"))
        .unwrap();
        let level = f.dir.path().to_path_buf();
        ControlsFile::new(vec![], vec![], vec![], vec![], vec![level_preload()])
            .save(&level.join("preloads.yaml"))
            .unwrap();

        f.cache
            .parse_preloads_data(global.path(), DataScope::Global)
            .unwrap();
        f.cache
            .parse_preloads_data(&level, DataScope::LevelSpecific)
            .unwrap();

        let common = f.cache.preload_id("Common").unwrap();
        assert_eq!(f.cache.get(common).unwrap().state(), PreloadState::Loading);
        pump_reads(&mut f, 1);
        assert_eq!(f.cache.get(common).unwrap().state(), PreloadState::Loaded);

        assert_eq!(
            f.cache
                .clear_preloads_data(&mut f.mock, DataScope::LevelSpecific),
            1
        );
        assert!(f.cache.preload_id("Level").is_err());
        assert!(f.cache.preload_id("Common").is_ok());

        assert_eq!(
            f.cache.clear_preloads_data(&mut f.mock, DataScope::Global),
            1
        );
        assert!(f.cache.preload_id("Common").is_err());
        assert_eq!(f.mock.handle().bank_count(), 0);
    }

    #[test]
    fn test_unknown_preload() {
        let mut f = fixture(vec![]);
        let id = PreloadId::from_name("Nothing");
        assert_eq!(
            f.cache.load(id).unwrap_err(),
            Error::ControlNotFound {
                kind: ControlKind::Preload,
                id: id.raw()
            }
        );
        f.cache.release(&mut f.mock);
    }
}
