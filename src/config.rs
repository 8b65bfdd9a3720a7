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
use std::path::{Path, PathBuf};

use tracing::error;

pub mod controls;
pub mod error;
pub mod system;

pub use self::controls::{
    ControlDefinition, ControlsFile, ImplNode, PreloadDefinition, SwitchDefinition,
};
pub use self::error::ConfigError;
pub use self::system::AtlConfig;

/// Reads every control data file (`*.yaml` / `*.yml`) directly inside the given folder, in file
/// name order. Files that fail to parse are logged and skipped.
pub fn read_control_files(folder: &Path) -> Result<Vec<(PathBuf, ControlsFile)>, ConfigError> {
    let entries = fs::read_dir(folder).map_err(|source| ConfigError::Io {
        path: folder.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigError::Io {
            path: folder.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml")
        {
            paths.push(path);
        }
    }
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        match ControlsFile::deserialize(&path) {
            Ok(file) => files.push((path, file)),
            Err(e) => error!(path = ?path, err = %e, "Error while parsing control data file"),
        }
    }
    Ok(files)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_read_control_files_skips_bad_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("b.yaml"),
            "triggers:\n  - name: Second\n",
        )
        .unwrap();
        fs::write(dir.path().join("a.yml"), "triggers:\n  - name: First\n").unwrap();
        fs::write(dir.path().join("broken.yaml"), "triggers: [ {").unwrap();
        fs::write(dir.path().join("notes.txt"), "not control data").unwrap();

        let files = read_control_files(dir.path()).unwrap();
        let names: Vec<&str> = files
            .iter()
            .map(|(_, file)| file.triggers()[0].name())
            .collect();
        assert_eq!(names, vec!["First", "Second"]);
    }

    #[test]
    fn test_read_missing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            read_control_files(&missing),
            Err(ConfigError::Io { .. })
        ));
    }
}
