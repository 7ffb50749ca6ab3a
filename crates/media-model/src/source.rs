//! Source descriptions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stable identifier of an attached source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What kinds of media a source produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceCapability {
    Video,
    Audio,
    Both,
}

impl SourceCapability {
    pub fn has_video(self) -> bool {
        matches!(self, Self::Video | Self::Both)
    }

    pub fn has_audio(self) -> bool {
        matches!(self, Self::Audio | Self::Both)
    }
}

/// Connection state of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    #[default]
    Idle,
    Active,
    /// Delivering nothing usable. The compositor keeps its last good frame.
    Stalled,
    Closed,
}

/// Screen region in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Source variant and its device/location parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    Camera {
        device: String,
    },
    Screen {
        display: u32,
        #[serde(default)]
        region: Option<Region>,
    },
    MediaFile {
        path: PathBuf,
        #[serde(default)]
        looped: bool,
    },
    Network {
        url: String,
    },
    /// Color bars with a moving marker and an optional sine tone.
    TestPattern {
        #[serde(default)]
        tone_hz: Option<f32>,
    },
}

impl SourceKind {
    /// Identifier the source registry resolves to a backend constructor.
    pub fn registry_key(&self) -> &'static str {
        match self {
            Self::Camera { .. } => "camera",
            Self::Screen { .. } => "screen",
            Self::MediaFile { .. } => "media_file",
            Self::Network { .. } => "network",
            Self::TestPattern { .. } => "test_pattern",
        }
    }
}

/// Everything needed to attach one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: SourceId,

    #[serde(flatten)]
    pub kind: SourceKind,

    /// Size frames are normalized to.
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    #[serde(default = "default_true")]
    pub video: bool,
    #[serde(default)]
    pub audio: bool,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
}

fn default_true() -> bool {
    true
}

fn default_sample_rate() -> u32 {
    48_000
}

fn default_channels() -> u16 {
    2
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, kind: SourceKind, width: u32, height: u32, fps: u32) -> Self {
        Self {
            id: SourceId::new(id),
            kind,
            width,
            height,
            fps,
            video: true,
            audio: false,
            sample_rate: default_sample_rate(),
            channels: default_channels(),
        }
    }

    pub fn with_audio(mut self, sample_rate: u32, channels: u16) -> Self {
        self.audio = true;
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }

    pub fn capability(&self) -> SourceCapability {
        match (self.video, self.audio) {
            (true, true) => SourceCapability::Both,
            (false, true) => SourceCapability::Audio,
            _ => SourceCapability::Video,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_config_json_shape() {
        let json = r#"{
            "id": "cam",
            "kind": "camera",
            "device": "/dev/video0",
            "width": 1280,
            "height": 720,
            "fps": 30,
            "audio": true
        }"#;
        let config: SourceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.kind.registry_key(), "camera");
        assert_eq!(config.capability(), SourceCapability::Both);
        assert_eq!(config.sample_rate, 48_000);
    }

    #[test]
    fn test_capability_flags() {
        let config = SourceConfig::new("bars", SourceKind::TestPattern { tone_hz: None }, 64, 36, 30);
        assert!(config.capability().has_video());
        assert!(!config.capability().has_audio());
    }
}
