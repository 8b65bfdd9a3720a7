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
use std::collections::HashMap;
use std::path::Path;

use config::{Config, File};
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// A YAML representation of one middleware implementation entry. The parameters are opaque to
/// the translation layer and are interpreted by the middleware when it builds its impl data.
#[derive(Deserialize, Clone, Serialize, Debug, PartialEq)]
pub struct ImplNode {
    /// The middleware-side name of the entry (event, parameter, bus...).
    name: String,

    /// Backend-specific parameters.
    #[serde(default)]
    params: HashMap<String, String>,
}

impl ImplNode {
    pub fn new(name: &str) -> ImplNode {
        ImplNode {
            name: name.to_string(),
            params: HashMap::new(),
        }
    }

    /// Adds a parameter, returning the node.
    pub fn with_param(mut self, key: &str, value: &str) -> ImplNode {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// A trigger, RTPC or environment definition.
#[derive(Deserialize, Clone, Serialize, Debug)]
pub struct ControlDefinition {
    /// The control name. Ids are derived from it.
    name: String,

    /// The middleware implementations. A trigger activates one event per entry.
    #[serde(default)]
    implementations: Vec<ImplNode>,
}

impl ControlDefinition {
    pub fn new(name: &str, implementations: Vec<ImplNode>) -> ControlDefinition {
        ControlDefinition {
            name: name.to_string(),
            implementations,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn implementations(&self) -> &[ImplNode] {
        &self.implementations
    }
}

/// A switch and its states.
#[derive(Deserialize, Clone, Serialize, Debug)]
pub struct SwitchDefinition {
    name: String,

    #[serde(default)]
    states: Vec<ControlDefinition>,
}

impl SwitchDefinition {
    pub fn new(name: &str, states: Vec<ControlDefinition>) -> SwitchDefinition {
        SwitchDefinition {
            name: name.to_string(),
            states,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> &[ControlDefinition] {
        &self.states
    }
}

/// A named set of banks that are loaded together.
#[derive(Deserialize, Clone, Serialize, Debug)]
pub struct PreloadDefinition {
    name: String,

    /// Load the preload as soon as it has been parsed.
    #[serde(default)]
    auto_load: bool,

    /// Bank files, relative to the folder the definition was read from.
    #[serde(default)]
    banks: Vec<String>,
}

impl PreloadDefinition {
    pub fn new(name: &str, auto_load: bool, banks: Vec<String>) -> PreloadDefinition {
        PreloadDefinition {
            name: name.to_string(),
            auto_load,
            banks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn auto_load(&self) -> bool {
        self.auto_load
    }

    pub fn banks(&self) -> &[String] {
        &self.banks
    }
}

/// A YAML representation of a control data file. A folder may contain any number of these.
#[derive(Deserialize, Clone, Serialize, Debug, Default)]
pub struct ControlsFile {
    #[serde(default)]
    triggers: Vec<ControlDefinition>,

    #[serde(default)]
    rtpcs: Vec<ControlDefinition>,

    #[serde(default)]
    switches: Vec<SwitchDefinition>,

    #[serde(default)]
    environments: Vec<ControlDefinition>,

    #[serde(default)]
    preloads: Vec<PreloadDefinition>,
}

impl ControlsFile {
    pub fn new(
        triggers: Vec<ControlDefinition>,
        rtpcs: Vec<ControlDefinition>,
        switches: Vec<SwitchDefinition>,
        environments: Vec<ControlDefinition>,
        preloads: Vec<PreloadDefinition>,
    ) -> ControlsFile {
        ControlsFile {
            triggers,
            rtpcs,
            switches,
            environments,
            preloads,
        }
    }

    /// Deserializes a control data file.
    pub fn deserialize(path: &Path) -> Result<ControlsFile, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<ControlsFile>()?)
    }

    /// Serializes this file as YAML and writes it to the given path.
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let serialized = serde_yml::to_string(self)?;
        std::fs::write(path, serialized)?;
        Ok(())
    }

    pub fn triggers(&self) -> &[ControlDefinition] {
        &self.triggers
    }

    pub fn rtpcs(&self) -> &[ControlDefinition] {
        &self.rtpcs
    }

    pub fn switches(&self) -> &[SwitchDefinition] {
        &self.switches
    }

    pub fn environments(&self) -> &[ControlDefinition] {
        &self.environments
    }

    pub fn preloads(&self) -> &[PreloadDefinition] {
        &self.preloads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_controls_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controls.yaml");
        std::fs::write(
            &path,
            r#"
triggers:
  - name: Explosion
    implementations:
      - name: explosion_near
        params:
          duration: "1500ms"
      - name: explosion_debris
rtpcs:
  - name: Speed
    implementations:
      - name: speed
switches:
  - name: Surface
    states:
      - name: Gravel
        implementations:
          - name: surface_gravel
      - name: Grass
preloads:
  - name: LevelBank
    auto_load: true
    banks:
      - level.bank
"#,
        )
        .unwrap();

        let file = ControlsFile::deserialize(&path).unwrap();
        assert_eq!(file.triggers().len(), 1);
        let explosion = &file.triggers()[0];
        assert_eq!(explosion.name(), "Explosion");
        assert_eq!(explosion.implementations().len(), 2);
        assert_eq!(
            explosion.implementations()[0].param("duration"),
            Some("1500ms")
        );
        assert_eq!(explosion.implementations()[1].param("duration"), None);

        assert_eq!(file.rtpcs().len(), 1);
        assert_eq!(file.switches()[0].states().len(), 2);
        assert!(file.switches()[0].states()[1].implementations().is_empty());
        assert!(file.environments().is_empty());

        let preload = &file.preloads()[0];
        assert!(preload.auto_load());
        assert_eq!(preload.banks(), &["level.bank".to_string()]);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.yaml");
        let file = ControlsFile::new(
            vec![ControlDefinition::new(
                "Footstep",
                vec![ImplNode::new("footstep").with_param("duration", "200ms")],
            )],
            vec![],
            vec![],
            vec![ControlDefinition::new("Cave", vec![ImplNode::new("cave")])],
            vec![],
        );
        file.save(&path).unwrap();

        let reloaded = ControlsFile::deserialize(&path).unwrap();
        assert_eq!(reloaded.triggers()[0].name(), "Footstep");
        assert_eq!(
            reloaded.triggers()[0].implementations()[0],
            ImplNode::new("footstep").with_param("duration", "200ms")
        );
        assert_eq!(reloaded.environments()[0].name(), "Cave");
    }
}
