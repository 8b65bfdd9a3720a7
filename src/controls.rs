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
//! The control data processor: parses control definitions into lookup tables and owns the
//! middleware impl data built from them.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::{self, ImplNode};
use crate::error::{Error, Result};
use crate::ids::{
    ControlKind, DataScope, EnvironmentId, RtpcId, SwitchId, SwitchStateId, TriggerId,
};
use crate::middleware::{Middleware, MiddlewareResult};

/// A registered control and the impl data of each of its implementation entries.
#[derive(Debug)]
pub struct Control<Id, D> {
    id: Id,
    name: String,
    scope: DataScope,
    entries: Vec<D>,
}

impl<Id: Copy, D> Control<Id, D> {
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> DataScope {
        self.scope
    }

    pub fn entries(&self) -> &[D] {
        &self.entries
    }
}

/// A registered switch and its states.
#[derive(Debug)]
pub struct Switch<D> {
    id: SwitchId,
    name: String,
    scope: DataScope,
    states: HashMap<SwitchStateId, Control<SwitchStateId, D>>,
}

impl<D> Switch<D> {
    pub fn id(&self) -> SwitchId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> DataScope {
        self.scope
    }

    pub fn state(&self, id: SwitchStateId) -> Option<&Control<SwitchStateId, D>> {
        self.states.get(&id)
    }

    pub fn states(&self) -> impl Iterator<Item = &Control<SwitchStateId, D>> {
        self.states.values()
    }
}

pub type Trigger<M> = Control<TriggerId, <M as Middleware>::TriggerData>;
pub type Rtpc<M> = Control<RtpcId, <M as Middleware>::RtpcData>;
pub type SwitchState<M> = Control<SwitchStateId, <M as Middleware>::SwitchStateData>;
pub type Environment<M> = Control<EnvironmentId, <M as Middleware>::EnvironmentData>;

/// The result of parsing one folder.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ParseSummary {
    pub registered: usize,
    /// Definitions refused because their id was already registered.
    pub rejected: usize,
}

/// Number of registered controls per table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ControlCounts {
    pub triggers: usize,
    pub rtpcs: usize,
    pub switches: usize,
    pub environments: usize,
}

pub struct ControlDataProcessor<M: Middleware> {
    triggers: HashMap<TriggerId, Trigger<M>>,
    rtpcs: HashMap<RtpcId, Rtpc<M>>,
    switches: HashMap<SwitchId, Switch<M::SwitchStateData>>,
    environments: HashMap<EnvironmentId, Environment<M>>,
}

impl<M: Middleware> ControlDataProcessor<M> {
    pub fn new() -> Self {
        Self {
            triggers: HashMap::new(),
            rtpcs: HashMap::new(),
            switches: HashMap::new(),
            environments: HashMap::new(),
        }
    }

    /// Parses every control data file in the folder and registers its controls under the given
    /// scope. Ids that are already registered are refused and the first definition wins.
    pub fn parse_controls_data(
        &mut self,
        middleware: &M,
        folder: &Path,
        scope: DataScope,
    ) -> Result<ParseSummary> {
        let files = config::read_control_files(folder).map_err(|e| Error::ControlData {
            path: folder.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut summary = ParseSummary::default();
        for (path, file) in files {
            debug!(path = ?path, scope = %scope, "Parsing control data file");

            for definition in file.triggers() {
                let entries = build_entries(definition.implementations(), |node| {
                    middleware.new_trigger_data(node)
                });
                register(
                    &mut self.triggers,
                    &mut summary,
                    TriggerId::from_name(definition.name()),
                    definition.name(),
                    scope,
                    entries,
                );
            }

            for definition in file.rtpcs() {
                let entries = build_entries(definition.implementations(), |node| {
                    middleware.new_rtpc_data(node)
                });
                register(
                    &mut self.rtpcs,
                    &mut summary,
                    RtpcId::from_name(definition.name()),
                    definition.name(),
                    scope,
                    entries,
                );
            }

            for definition in file.environments() {
                let entries = build_entries(definition.implementations(), |node| {
                    middleware.new_environment_data(node)
                });
                register(
                    &mut self.environments,
                    &mut summary,
                    EnvironmentId::from_name(definition.name()),
                    definition.name(),
                    scope,
                    entries,
                );
            }

            for definition in file.switches() {
                let id = SwitchId::from_name(definition.name());
                if let Some(existing) = self.switches.get(&id) {
                    reject(ControlKind::Switch, id, definition.name(), existing.name());
                    summary.rejected += 1;
                    continue;
                }

                let mut states = HashMap::new();
                for state in definition.states() {
                    let entries = build_entries(state.implementations(), |node| {
                        middleware.new_switch_state_data(node)
                    });
                    register(
                        &mut states,
                        &mut summary,
                        SwitchStateId::from_name(state.name()),
                        state.name(),
                        scope,
                        entries,
                    );
                }

                self.switches.insert(
                    id,
                    Switch {
                        id,
                        name: definition.name().to_string(),
                        scope,
                        states,
                    },
                );
                summary.registered += 1;
            }
        }

        info!(
            folder = ?folder,
            scope = %scope,
            registered = summary.registered,
            rejected = summary.rejected,
            "Control data parsed"
        );
        Ok(summary)
    }

    /// Removes every control registered under exactly this scope. Returns how many were removed.
    pub fn clear_controls_data(&mut self, scope: DataScope) -> usize {
        let before = self.len();
        self.triggers.retain(|_, c| c.scope != scope);
        self.rtpcs.retain(|_, c| c.scope != scope);
        self.switches.retain(|_, s| s.scope != scope);
        self.environments.retain(|_, c| c.scope != scope);
        let removed = before - self.len();
        info!(scope = %scope, removed, "Control data cleared");
        removed
    }

    fn len(&self) -> usize {
        self.triggers.len() + self.rtpcs.len() + self.switches.len() + self.environments.len()
    }

    pub fn counts(&self) -> ControlCounts {
        ControlCounts {
            triggers: self.triggers.len(),
            rtpcs: self.rtpcs.len(),
            switches: self.switches.len(),
            environments: self.environments.len(),
        }
    }

    pub fn trigger(&self, id: TriggerId) -> Result<&Trigger<M>> {
        self.triggers.get(&id).ok_or_else(|| not_found(ControlKind::Trigger, id.raw()))
    }

    pub fn rtpc(&self, id: RtpcId) -> Result<&Rtpc<M>> {
        self.rtpcs.get(&id).ok_or_else(|| not_found(ControlKind::Rtpc, id.raw()))
    }

    pub fn switch(&self, id: SwitchId) -> Result<&Switch<M::SwitchStateData>> {
        self.switches
            .get(&id)
            .ok_or_else(|| not_found(ControlKind::Switch, id.raw()))
    }

    pub fn switch_state(&self, switch: SwitchId, state: SwitchStateId) -> Result<&SwitchState<M>> {
        self.switch(switch)?
            .state(state)
            .ok_or_else(|| not_found(ControlKind::SwitchState, state.raw()))
    }

    pub fn environment(&self, id: EnvironmentId) -> Result<&Environment<M>> {
        self.environments
            .get(&id)
            .ok_or_else(|| not_found(ControlKind::Environment, id.raw()))
    }

    pub fn triggers(&self) -> impl Iterator<Item = &Trigger<M>> {
        self.triggers.values()
    }

    pub fn rtpcs(&self) -> impl Iterator<Item = &Rtpc<M>> {
        self.rtpcs.values()
    }

    pub fn switches(&self) -> impl Iterator<Item = &Switch<M::SwitchStateData>> {
        self.switches.values()
    }

    pub fn environments(&self) -> impl Iterator<Item = &Environment<M>> {
        self.environments.values()
    }
}

impl<M: Middleware> Default for ControlDataProcessor<M> {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(kind: ControlKind, id: u32) -> Error {
    Error::ControlNotFound { kind, id }
}

/// Builds the impl data for each entry. Entries the middleware refuses are logged and dropped
/// so that the rest of the control stays usable.
fn build_entries<D>(
    nodes: &[ImplNode],
    mut build: impl FnMut(&ImplNode) -> MiddlewareResult<D>,
) -> Vec<D> {
    nodes
        .iter()
        .filter_map(|node| match build(node) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(entry = node.name(), err = %e, "Dropping implementation entry");
                None
            }
        })
        .collect()
}

fn register<Id, D>(
    table: &mut HashMap<Id, Control<Id, D>>,
    summary: &mut ParseSummary,
    id: Id,
    name: &str,
    scope: DataScope,
    entries: Vec<D>,
) where
    Id: Copy + Eq + Hash + Display + IdKind,
{
    if let Some(existing) = table.get(&id) {
        reject(Id::KIND, id, name, existing.name());
        summary.rejected += 1;
        return;
    }
    table.insert(
        id,
        Control {
            id,
            name: name.to_string(),
            scope,
            entries,
        },
    );
    summary.registered += 1;
}

fn reject(kind: ControlKind, id: impl Display, name: &str, existing: &str) {
    if name.eq_ignore_ascii_case(existing) {
        warn!(%kind, %id, name, "Control already registered, keeping the first definition");
    } else {
        warn!(
            %kind,
            %id,
            name,
            existing,
            "Control id collision, keeping the first definition"
        );
    }
}

/// Ties an id type to its control kind for logging and errors.
trait IdKind {
    const KIND: ControlKind;
}

impl IdKind for TriggerId {
    const KIND: ControlKind = ControlKind::Trigger;
}

impl IdKind for RtpcId {
    const KIND: ControlKind = ControlKind::Rtpc;
}

impl IdKind for SwitchStateId {
    const KIND: ControlKind = ControlKind::SwitchState;
}

impl IdKind for EnvironmentId {
    const KIND: ControlKind = ControlKind::Environment;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ControlDefinition, ControlsFile, SwitchDefinition};
    use crate::middleware::mock::MockMiddleware;
    use crate::testutil::definition;

    fn write_controls(folder: &Path, file_name: &str, file: ControlsFile) {
        file.save(&folder.join(file_name)).unwrap();
    }

    fn explosion_file() -> ControlsFile {
        ControlsFile::new(
            vec![definition("Explosion", &["explosion_near", "explosion_debris"])],
            vec![definition("Speed", &["speed"])],
            vec![SwitchDefinition::new(
                "Surface",
                vec![
                    definition("Gravel", &["surface_gravel"]),
                    definition("Grass", &["surface_grass"]),
                ],
            )],
            vec![definition("Cave", &["cave_reverb"])],
            vec![],
        )
    }

    #[test]
    fn test_parse_registers_all_tables() {
        let dir = tempfile::tempdir().unwrap();
        write_controls(dir.path(), "level.yaml", explosion_file());

        let mock = MockMiddleware::new("mock");
        let mut processor = ControlDataProcessor::<MockMiddleware>::new();
        let summary = processor
            .parse_controls_data(&mock, dir.path(), DataScope::LevelSpecific)
            .unwrap();

        // Trigger, RTPC, switch, two states and environment.
        assert_eq!(summary.registered, 6);
        assert_eq!(summary.rejected, 0);

        let explosion = processor
            .trigger(TriggerId::from_name("Explosion"))
            .unwrap();
        assert_eq!(explosion.entries().len(), 2);
        assert_eq!(explosion.scope(), DataScope::LevelSpecific);
        assert_eq!(explosion.entries()[1].event(), "explosion_debris");

        let gravel = processor
            .switch_state(
                SwitchId::from_name("Surface"),
                SwitchStateId::from_name("Gravel"),
            )
            .unwrap();
        assert_eq!(gravel.name(), "Gravel");
        assert!(processor.rtpc(RtpcId::from_name("Speed")).is_ok());
        assert!(processor
            .environment(EnvironmentId::from_name("Cave"))
            .is_ok());
    }

    #[test]
    fn test_unknown_controls_are_not_found() {
        let processor = ControlDataProcessor::<MockMiddleware>::new();
        let id = TriggerId::from_name("Nothing");
        assert_eq!(
            processor.trigger(id).unwrap_err(),
            Error::ControlNotFound {
                kind: ControlKind::Trigger,
                id: id.raw()
            }
        );
    }

    #[test]
    fn test_unknown_switch_state() {
        let dir = tempfile::tempdir().unwrap();
        write_controls(dir.path(), "level.yaml", explosion_file());
        let mock = MockMiddleware::new("mock");
        let mut processor = ControlDataProcessor::<MockMiddleware>::new();
        processor
            .parse_controls_data(&mock, dir.path(), DataScope::Global)
            .unwrap();

        let err = processor
            .switch_state(
                SwitchId::from_name("Surface"),
                SwitchStateId::from_name("Lava"),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ControlNotFound {
                kind: ControlKind::SwitchState,
                ..
            }
        ));
    }

    #[test]
    fn test_reregistration_keeps_first_definition() {
        let global = tempfile::tempdir().unwrap();
        let level = tempfile::tempdir().unwrap();
        write_controls(
            global.path(),
            "global.yaml",
            ControlsFile::new(
                vec![definition("Explosion", &["global_explosion"])],
                vec![],
                vec![],
                vec![],
                vec![],
            ),
        );
        write_controls(level.path(), "level.yaml", explosion_file());

        let mock = MockMiddleware::new("mock");
        let mut processor = ControlDataProcessor::<MockMiddleware>::new();
        processor
            .parse_controls_data(&mock, global.path(), DataScope::Global)
            .unwrap();
        let summary = processor
            .parse_controls_data(&mock, level.path(), DataScope::LevelSpecific)
            .unwrap();
        assert_eq!(summary.rejected, 1);

        let explosion = processor
            .trigger(TriggerId::from_name("Explosion"))
            .unwrap();
        assert_eq!(explosion.scope(), DataScope::Global);
        assert_eq!(explosion.entries().len(), 1);
    }

    #[test]
    fn test_clear_is_scoped() {
        let global = tempfile::tempdir().unwrap();
        let level = tempfile::tempdir().unwrap();
        write_controls(
            global.path(),
            "global.yaml",
            ControlsFile::new(
                vec![definition("Music", &["music"])],
                vec![],
                vec![],
                vec![],
                vec![],
            ),
        );
        write_controls(level.path(), "level.yaml", explosion_file());

        let mock = MockMiddleware::new("mock");
        let mut processor = ControlDataProcessor::<MockMiddleware>::new();
        processor
            .parse_controls_data(&mock, global.path(), DataScope::Global)
            .unwrap();
        processor
            .parse_controls_data(&mock, level.path(), DataScope::LevelSpecific)
            .unwrap();

        assert_eq!(processor.clear_controls_data(DataScope::LevelSpecific), 4);
        assert!(processor.trigger(TriggerId::from_name("Music")).is_ok());
        assert!(processor
            .trigger(TriggerId::from_name("Explosion"))
            .is_err());

        assert_eq!(processor.clear_controls_data(DataScope::Global), 1);
        assert_eq!(processor.counts(), ControlCounts::default());
    }

    #[test]
    fn test_bad_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write_controls(
            dir.path(),
            "level.yaml",
            ControlsFile::new(
                vec![ControlDefinition::new(
                    "Broken",
                    vec![
                        ImplNode::new("ok"),
                        ImplNode::new("bad").with_param("duration", "later"),
                    ],
                )],
                vec![],
                vec![],
                vec![],
                vec![],
            ),
        );

        let mock = MockMiddleware::new("mock");
        let mut processor = ControlDataProcessor::<MockMiddleware>::new();
        processor
            .parse_controls_data(&mock, dir.path(), DataScope::Global)
            .unwrap();
        let broken = processor.trigger(TriggerId::from_name("Broken")).unwrap();
        assert_eq!(broken.entries().len(), 1);
    }

    #[test]
    fn test_missing_folder_is_control_data_error() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockMiddleware::new("mock");
        let mut processor = ControlDataProcessor::<MockMiddleware>::new();
        let err = processor
            .parse_controls_data(&mock, &dir.path().join("missing"), DataScope::Global)
            .unwrap_err();
        assert!(matches!(err, Error::ControlData { .. }));
    }
}
