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
//! A point-in-time summary of the translation layer, for tooling.

use std::fmt;

use serde::Serialize;

use crate::atl::TranslationLayer;
use crate::controls::ControlCounts;
use crate::file_cache::PreloadState;
use crate::ids::{DataScope, ListenerId, ObjectId, PreloadId};
use crate::middleware::Middleware;
use crate::state::SystemState;

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub middleware: String,
    pub state: SystemState,
    pub language: String,
    pub tick: u64,
    pub queued: usize,
    pub controls: ControlCounts,
    pub objects: PoolReport,
    pub listeners: PoolReport,
    pub override_listener: Option<ListenerId>,
    pub object_entries: Vec<ObjectReport>,
    pub live_events: usize,
    /// Audio input sources currently open.
    pub sources: usize,
    pub preloads: Vec<PreloadReport>,
    /// Bytes held by loaded banks.
    pub memory: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolReport {
    pub reserved: usize,
    pub available: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObjectReport {
    pub id: ObjectId,
    pub name: Option<String>,
    pub live_events: usize,
    pub listener_distance: Option<f32>,
    pub release_pending: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreloadReport {
    pub id: PreloadId,
    pub name: String,
    pub scope: DataScope,
    pub state: PreloadState,
    pub ref_count: u32,
    pub banks: usize,
    pub memory: usize,
}

impl Report {
    pub fn collect<M: Middleware>(layer: &TranslationLayer<M>) -> Report {
        let objects = layer.objects();
        let object_entries = objects
            .ids()
            .into_iter()
            .filter_map(|id| objects.get(id).ok())
            .map(|object| ObjectReport {
                id: object.id(),
                name: object.name().map(str::to_string),
                live_events: layer.events().live_count(object.id()),
                listener_distance: object.listener_distance(),
                release_pending: object.is_release_pending(),
            })
            .collect();

        let mut preloads: Vec<PreloadReport> = layer
            .file_cache()
            .preloads()
            .map(|preload| PreloadReport {
                id: preload.id(),
                name: preload.name().to_string(),
                scope: preload.scope(),
                state: preload.state(),
                ref_count: preload.ref_count(),
                banks: preload.banks().len(),
                memory: preload.memory(),
            })
            .collect();
        preloads.sort_by(|a, b| a.name.cmp(&b.name));

        let listeners = layer.listeners();
        Report {
            middleware: layer.middleware().name().to_string(),
            state: layer.state(),
            language: layer.language().to_string(),
            tick: layer.snapshot().tick,
            queued: layer.queued(),
            controls: layer.controls().counts(),
            objects: PoolReport {
                reserved: objects.reserved(),
                available: objects.available(),
                capacity: objects.capacity(),
            },
            listeners: PoolReport {
                reserved: listeners.reserved(),
                available: listeners.available(),
                capacity: listeners.capacity(),
            },
            override_listener: listeners.override_listener(),
            object_entries,
            live_events: layer.events().len(),
            sources: layer.sources().len(),
            preloads,
            memory: layer.file_cache().memory(),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Middleware: {} ({:?}, language {})",
            self.middleware, self.state, self.language
        )?;
        writeln!(f, "Tick: {} ({} queued)", self.tick, self.queued)?;
        writeln!(
            f,
            "Controls: {} triggers, {} rtpcs, {} switches, {} environments",
            self.controls.triggers,
            self.controls.rtpcs,
            self.controls.switches,
            self.controls.environments
        )?;
        writeln!(
            f,
            "Objects: {}/{} reserved",
            self.objects.reserved, self.objects.capacity
        )?;
        for object in self.object_entries.iter() {
            write!(f, "- {}", object.id)?;
            if let Some(name) = &object.name {
                write!(f, " ({})", name)?;
            }
            write!(f, ": {} live events", object.live_events)?;
            if object.release_pending {
                write!(f, ", release pending")?;
            }
            writeln!(f)?;
        }
        writeln!(
            f,
            "Listeners: {}/{} reserved",
            self.listeners.reserved, self.listeners.capacity
        )?;
        writeln!(f, "Live events: {}", self.live_events)?;
        writeln!(f, "Audio sources: {}", self.sources)?;
        writeln!(f, "Preloads ({} bytes cached):", self.memory)?;
        for preload in self.preloads.iter() {
            writeln!(
                f,
                "- {} [{}]: {:?}, {} banks, {} bytes",
                preload.name, preload.scope, preload.state, preload.banks, preload.memory
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::AtlConfig;
    use crate::middleware::mock::MockMiddleware;
    use crate::request::{ManagerRequest, ObjectRequest, Request, RequestOutcome};
    use crate::testutil;

    #[test]
    fn test_report() {
        let dir = tempfile::tempdir().unwrap();
        testutil::write_level_data(dir.path());

        let config = AtlConfig::default()
            .with_object_pool_size(4)
            .with_listener_pool_size(2);
        let mut layer = TranslationLayer::new(MockMiddleware::new("mock"), &config);
        layer.initialize().unwrap();
        layer
            .process_request(Request::new(ManagerRequest::ParseControlsData {
                folder: dir.path().to_path_buf(),
                scope: DataScope::LevelSpecific,
            }))
            .unwrap();
        layer
            .process_request(Request::new(ManagerRequest::ParsePreloadsData {
                folder: dir.path().to_path_buf(),
                scope: DataScope::LevelSpecific,
            }))
            .unwrap();
        let object = match layer
            .process_request(Request::new(ManagerRequest::ReserveObject {
                name: Some("door".to_string()),
            }))
            .unwrap()
        {
            RequestOutcome::ObjectReserved(id) => id,
            outcome => panic!("unexpected outcome {:?}", outcome),
        };
        let trigger = layer.trigger_id("Explosion").unwrap();
        layer
            .process_request(Request::object(
                object,
                ObjectRequest::ExecuteTrigger {
                    trigger,
                    delay: Duration::ZERO,
                    source: None,
                },
            ))
            .unwrap();

        let report = Report::collect(&layer);
        assert_eq!(report.middleware, "mock");
        assert_eq!(report.state, SystemState::Running);
        assert_eq!(report.controls.triggers, 4);
        assert_eq!(report.objects.reserved, 1);
        assert_eq!(report.objects.available, 3);
        assert_eq!(report.listeners.capacity, 2);
        assert_eq!(report.live_events, 2);
        assert_eq!(report.sources, 0);
        assert_eq!(report.preloads.len(), 1);
        assert_eq!(report.preloads[0].state, PreloadState::Unloaded);

        let door = report
            .object_entries
            .iter()
            .find(|o| o.id == object)
            .unwrap();
        assert_eq!(door.name.as_deref(), Some("door"));
        assert_eq!(door.live_events, 2);

        let text = report.to_string();
        assert!(text.contains("Objects: 1/4 reserved"));
        assert!(text.contains("- Level [level]: Unloaded, 1 banks, 0 bytes"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["live_events"], 2);
        assert_eq!(json["preloads"][0]["name"], "Level");

        layer.shut_down().unwrap();
        let report = Report::collect(&layer);
        assert_eq!(report.state, SystemState::ShuttingDown);
        assert_eq!(report.objects.reserved, 0);
        assert_eq!(report.live_events, 0);
        assert!(report.object_entries.is_empty());
    }
}
