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
//! Audio input sources: external PCM streams, files or capture devices that triggers can play
//! from instead of their authored content.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::ids::SourceId;
use crate::middleware::Middleware;

/// Where the samples of an input source come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AudioInputSourceType {
    PcmFile,
    WavFile,
    Mp3File,
    OggFile,
    OpusFile,
    Microphone,
    Synthesis,
    ExternalStream,
}

impl AudioInputSourceType {
    pub fn is_file(self) -> bool {
        matches!(
            self,
            AudioInputSourceType::PcmFile
                | AudioInputSourceType::WavFile
                | AudioInputSourceType::Mp3File
                | AudioInputSourceType::OggFile
                | AudioInputSourceType::OpusFile
        )
    }
}

impl fmt::Display for AudioInputSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioInputSourceType::PcmFile => "pcm file",
            AudioInputSourceType::WavFile => "wav file",
            AudioInputSourceType::Mp3File => "mp3 file",
            AudioInputSourceType::OggFile => "ogg file",
            AudioInputSourceType::OpusFile => "opus file",
            AudioInputSourceType::Microphone => "microphone",
            AudioInputSourceType::Synthesis => "synthesis",
            AudioInputSourceType::ExternalStream => "external stream",
        };
        f.write_str(name)
    }
}

/// The sample format an input source delivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AudioInputSampleType {
    Int16,
    Float32,
}

/// Describes an input source to create.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AudioInputConfig {
    pub source_type: AudioInputSourceType,
    pub sample_type: AudioInputSampleType,
    pub sample_rate: u32,
    pub channels: u16,
    /// The file to read, for file sources.
    pub file: Option<PathBuf>,
}

impl AudioInputConfig {
    pub fn new(source_type: AudioInputSourceType) -> AudioInputConfig {
        AudioInputConfig {
            source_type,
            sample_type: AudioInputSampleType::Int16,
            sample_rate: 48_000,
            channels: 1,
            file: None,
        }
    }

    pub fn with_format(
        mut self,
        sample_type: AudioInputSampleType,
        sample_rate: u32,
        channels: u16,
    ) -> AudioInputConfig {
        self.sample_type = sample_type;
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }

    pub fn with_file(mut self, file: PathBuf) -> AudioInputConfig {
        self.file = Some(file);
        self
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".to_string());
        }
        if self.channels == 0 {
            return Err("at least one channel is needed".to_string());
        }
        if self.source_type.is_file() && self.file.is_none() {
            return Err(format!("a {} source needs a file", self.source_type));
        }
        Ok(())
    }
}

/// Keeps track of the input sources created with the middleware.
pub struct SourceManager {
    sources: BTreeMap<SourceId, AudioInputConfig>,
    next_id: u32,
}

impl Default for SourceManager {
    fn default() -> Self {
        SourceManager::new()
    }
}

impl SourceManager {
    pub fn new() -> SourceManager {
        SourceManager {
            sources: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Creates a source with the middleware under a fresh id.
    pub fn create<M: Middleware>(
        &mut self,
        middleware: &mut M,
        config: AudioInputConfig,
    ) -> Result<SourceId> {
        config.validate().map_err(Error::InvalidSourceConfig)?;
        let raw = self.next_id;
        self.next_id = raw.checked_add(1).ok_or_else(|| {
            Error::InvalidSourceConfig("no source ids left".to_string())
        })?;
        let id = SourceId::from_raw(raw);

        middleware.create_source(id, &config)?;
        debug!(source = %id, kind = %config.source_type, "Audio source created");
        self.sources.insert(id, config);
        Ok(id)
    }

    /// Destroys a source. Events already playing from it are left to the middleware.
    pub fn destroy<M: Middleware>(&mut self, middleware: &mut M, id: SourceId) -> Result<()> {
        if self.sources.remove(&id).is_none() {
            return Err(Error::InvalidSource(id));
        }
        if let Err(e) = middleware.destroy_source(id) {
            warn!(source = %id, err = %e, "Middleware failed to destroy audio source");
        }
        debug!(source = %id, "Audio source destroyed");
        Ok(())
    }

    pub fn get(&self, id: SourceId) -> Result<&AudioInputConfig> {
        self.sources.get(&id).ok_or(Error::InvalidSource(id))
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.sources.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Destroys every source. Used during shut down.
    pub fn release<M: Middleware>(&mut self, middleware: &mut M) {
        for id in std::mem::take(&mut self.sources).into_keys() {
            if let Err(e) = middleware.destroy_source(id) {
                warn!(source = %id, err = %e, "Middleware failed to destroy audio source");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::mock::{MockCall, MockMiddleware};

    #[test]
    fn test_create_and_destroy() {
        let mut mock = MockMiddleware::new("mock");
        let handle = mock.handle();
        let mut sources = SourceManager::new();

        let microphone = sources
            .create(&mut mock, AudioInputConfig::new(AudioInputSourceType::Microphone))
            .unwrap();
        let file = sources
            .create(
                &mut mock,
                AudioInputConfig::new(AudioInputSourceType::WavFile)
                    .with_format(AudioInputSampleType::Float32, 44_100, 2)
                    .with_file(PathBuf::from("voice.wav")),
            )
            .unwrap();
        assert_ne!(microphone, file);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources.get(file).unwrap().channels, 2);
        assert_eq!(handle.source_count(), 2);

        sources.destroy(&mut mock, microphone).unwrap();
        assert_eq!(
            sources.destroy(&mut mock, microphone),
            Err(Error::InvalidSource(microphone))
        );
        assert!(handle.calls().contains(&MockCall::DestroySource(microphone)));

        // Ids are not reused.
        let next = sources
            .create(&mut mock, AudioInputConfig::new(AudioInputSourceType::Synthesis))
            .unwrap();
        assert!(next > file);
    }

    #[test]
    fn test_invalid_configs_are_refused() {
        let mut mock = MockMiddleware::new("mock");
        let handle = mock.handle();
        let mut sources = SourceManager::new();

        assert!(matches!(
            sources.create(&mut mock, AudioInputConfig::new(AudioInputSourceType::OggFile)),
            Err(Error::InvalidSourceConfig(_))
        ));
        assert!(matches!(
            sources.create(
                &mut mock,
                AudioInputConfig::new(AudioInputSourceType::Microphone).with_format(
                    AudioInputSampleType::Int16,
                    0,
                    1
                )
            ),
            Err(Error::InvalidSourceConfig(_))
        ));
        assert!(sources.is_empty());
        assert_eq!(handle.source_count(), 0);
    }

    #[test]
    fn test_release_destroys_everything() {
        let mut mock = MockMiddleware::new("mock");
        let handle = mock.handle();
        let mut sources = SourceManager::new();
        for _ in 0..3 {
            sources
                .create(&mut mock, AudioInputConfig::new(AudioInputSourceType::ExternalStream))
                .unwrap();
        }

        sources.release(&mut mock);
        assert!(sources.is_empty());
        assert_eq!(handle.source_count(), 0);
    }
}
