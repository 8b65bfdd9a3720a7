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
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, SystemTime};

use crate::config::{ControlDefinition, ControlsFile, ImplNode, PreloadDefinition, SwitchDefinition};

/// Builds a control definition whose entries carry no parameters.
pub fn definition(name: &str, entries: &[&str]) -> ControlDefinition {
    ControlDefinition::new(name, entries.iter().map(|e| ImplNode::new(e)).collect())
}

/// Writes the level fixture: triggers Explosion (two entries), Footstep (one 20ms entry),
/// Broken (rejected by the mock) and HalfBroken (one of two entries rejected), the Speed RTPC,
/// the Surface switch, the Cave environment and the Level preload backed by `level.bank`.
pub fn write_level_data(folder: &Path) {
    fs::write(folder.join("level.bank"), b"level bank contents").unwrap();
    ControlsFile::new(
        vec![
            definition("Explosion", &["explosion_near", "explosion_debris"]),
            ControlDefinition::new(
                "Footstep",
                vec![ImplNode::new("footstep").with_param("duration", "20ms")],
            ),
            ControlDefinition::new(
                "Broken",
                vec![ImplNode::new("broken").with_param("reject", "true")],
            ),
            ControlDefinition::new(
                "HalfBroken",
                vec![
                    ImplNode::new("half"),
                    ImplNode::new("broken").with_param("reject", "true"),
                ],
            ),
        ],
        vec![definition("Speed", &["speed"])],
        vec![SwitchDefinition::new(
            "Surface",
            vec![
                definition("Gravel", &["surface_gravel"]),
                definition("Grass", &["surface_grass"]),
            ],
        )],
        vec![definition("Cave", &["cave_reverb"])],
        vec![PreloadDefinition::new(
            "Level",
            false,
            vec!["level.bank".to_string()],
        )],
    )
    .save(&folder.join("level.yaml"))
    .unwrap();
}

/// Writes the global fixture: the Music trigger and the Common preload.
pub fn write_global_data(folder: &Path) {
    fs::write(folder.join("common.bank"), b"common bank contents").unwrap();
    ControlsFile::new(
        vec![definition("Music", &["music_loop"])],
        vec![],
        vec![],
        vec![],
        vec![PreloadDefinition::new(
            "Common",
            false,
            vec!["common.bank".to_string()],
        )],
    )
    .save(&folder.join("global.yaml"))
    .unwrap();
}

/// Wait for the given predicate to return true or fail.
#[inline]
pub fn eventually<F>(mut predicate: F, error_msg: &str)
where
    F: FnMut() -> bool,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);

    loop {
        let elapsed = start.elapsed();
        if elapsed.is_err() {
            panic!("System time error");
        }
        let elapsed = elapsed.unwrap();

        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }
        thread::sleep(tick);
    }
}
