//! Output targets and connection state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::encoder::MuxFormat;
use crate::ParseError;

/// Live streaming protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamProtocol {
    Rtmp,
    Rtmps,
    Srt,
    Udp,
}

impl StreamProtocol {
    /// Detect the protocol from a URL scheme.
    pub fn from_url(url: &str) -> Result<Self, ParseError> {
        let scheme = url
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| ParseError::new("stream url", url))?;
        scheme.parse()
    }

    /// Container the remux process writes for this protocol.
    pub fn mux(self) -> MuxFormat {
        match self {
            Self::Rtmp | Self::Rtmps => MuxFormat::Flv,
            Self::Srt | Self::Udp => MuxFormat::MpegTs,
        }
    }
}

impl std::str::FromStr for StreamProtocol {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rtmp" => Ok(Self::Rtmp),
            "rtmps" => Ok(Self::Rtmps),
            "srt" => Ok(Self::Srt),
            "udp" => Ok(Self::Udp),
            _ => Err(ParseError::new("stream protocol", s)),
        }
    }
}

/// Recording container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Mkv,
    Flv,
    Ts,
}

impl Container {
    /// Guess the container from a file extension, defaulting to MP4.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("mkv") => Self::Mkv,
            Some("flv") => Self::Flv,
            Some("ts") | Some("m2ts") => Self::Ts,
            _ => Self::Mp4,
        }
    }

    pub fn mux(self) -> MuxFormat {
        match self {
            Self::Mp4 => MuxFormat::FragmentedMp4,
            Self::Mkv => MuxFormat::Matroska,
            Self::Flv => MuxFormat::Flv,
            Self::Ts => MuxFormat::MpegTs,
        }
    }
}

/// Credentials for a network target.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Appended to the URL as its final path segment.
    pub stream_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("stream_key", &self.stream_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Where encoded output goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputTarget {
    Network {
        protocol: StreamProtocol,
        url: String,
        #[serde(default)]
        credentials: Credentials,
    },
    File {
        path: PathBuf,
        container: Container,
    },
}

impl OutputTarget {
    /// A network target with the protocol taken from the URL scheme.
    pub fn network(url: impl Into<String>, stream_key: Option<String>) -> Result<Self, ParseError> {
        let url = url.into();
        let protocol = StreamProtocol::from_url(&url)?;
        Ok(Self::Network {
            protocol,
            url,
            credentials: Credentials { stream_key },
        })
    }

    /// A file target with the container taken from the extension.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let container = Container::from_path(&path);
        Self::File { path, container }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Full URL including the stream key. Never log this.
    pub fn connect_url(&self) -> Option<String> {
        match self {
            Self::Network {
                url, credentials, ..
            } => Some(match &credentials.stream_key {
                Some(key) if !key.is_empty() => {
                    format!("{}/{}", url.trim_end_matches('/'), key)
                }
                _ => url.clone(),
            }),
            Self::File { .. } => None,
        }
    }

    /// Format the encoder session should emit for this target.
    ///
    /// Network targets receive MPEG-TS, which the remux process rewraps.
    pub fn encoder_mux(&self) -> MuxFormat {
        match self {
            Self::Network { .. } => MuxFormat::MpegTs,
            Self::File { container, .. } => container.mux(),
        }
    }

    /// Loggable description without credentials.
    pub fn describe(&self) -> String {
        match self {
            Self::Network { protocol, url, .. } => format!("{protocol:?} {url}"),
            Self::File { path, container } => format!("{container:?} file {}", path.display()),
        }
    }
}

/// Connection state of an output sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}
