//! Encoder configuration types.

use serde::{Deserialize, Serialize};

use crate::ParseError;

/// Output video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    Hevc,
}

impl std::str::FromStr for VideoCodec {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" | "x264" => Ok(Self::H264),
            "hevc" | "h265" | "x265" => Ok(Self::Hevc),
            _ => Err(ParseError::new("codec", s)),
        }
    }
}

/// Encoder implementation family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Nvenc,
    VideoToolbox,
    Qsv,
    Amf,
    Vaapi,
    Software,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        Self::Nvenc,
        Self::VideoToolbox,
        Self::Qsv,
        Self::Amf,
        Self::Vaapi,
        Self::Software,
    ];

    pub fn is_hardware(self) -> bool {
        !matches!(self, Self::Software)
    }

    /// Transcoder encoder name for `codec`.
    pub fn encoder_name(self, codec: VideoCodec) -> &'static str {
        match (self, codec) {
            (Self::Nvenc, VideoCodec::H264) => "h264_nvenc",
            (Self::Nvenc, VideoCodec::Hevc) => "hevc_nvenc",
            (Self::VideoToolbox, VideoCodec::H264) => "h264_videotoolbox",
            (Self::VideoToolbox, VideoCodec::Hevc) => "hevc_videotoolbox",
            (Self::Qsv, VideoCodec::H264) => "h264_qsv",
            (Self::Qsv, VideoCodec::Hevc) => "hevc_qsv",
            (Self::Amf, VideoCodec::H264) => "h264_amf",
            (Self::Amf, VideoCodec::Hevc) => "hevc_amf",
            (Self::Vaapi, VideoCodec::H264) => "h264_vaapi",
            (Self::Vaapi, VideoCodec::Hevc) => "hevc_vaapi",
            (Self::Software, VideoCodec::H264) => "libx264",
            (Self::Software, VideoCodec::Hevc) => "libx265",
        }
    }

    /// Name reported by `-hwaccels` for this backend, if any.
    pub fn hwaccel_name(self) -> Option<&'static str> {
        match self {
            Self::Nvenc => Some("cuda"),
            Self::VideoToolbox => Some("videotoolbox"),
            Self::Qsv => Some("qsv"),
            Self::Amf => Some("d3d11va"),
            Self::Vaapi => Some("vaapi"),
            Self::Software => None,
        }
    }

    /// Hardware-first preference for the host platform, ending in software.
    pub fn platform_default_preference() -> Vec<BackendKind> {
        if cfg!(target_os = "macos") {
            vec![Self::VideoToolbox, Self::Software]
        } else if cfg!(target_os = "windows") {
            vec![Self::Nvenc, Self::Amf, Self::Qsv, Self::Software]
        } else {
            vec![Self::Nvenc, Self::Vaapi, Self::Qsv, Self::Software]
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nvenc => "nvenc",
            Self::VideoToolbox => "videotoolbox",
            Self::Qsv => "qsv",
            Self::Amf => "amf",
            Self::Vaapi => "vaapi",
            Self::Software => "software",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nvenc" | "nvidia" => Ok(Self::Nvenc),
            "videotoolbox" | "vt" => Ok(Self::VideoToolbox),
            "qsv" | "intel" => Ok(Self::Qsv),
            "amf" | "amd" => Ok(Self::Amf),
            "vaapi" => Ok(Self::Vaapi),
            "software" | "x264" | "libx264" | "cpu" => Ok(Self::Software),
            _ => Err(ParseError::new("encoder backend", s)),
        }
    }
}

/// Speed/quality trade-off, in x264 terms. Hardware backends map it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderPreset {
    Ultrafast,
    Superfast,
    #[default]
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

impl EncoderPreset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ultrafast => "ultrafast",
            Self::Superfast => "superfast",
            Self::Veryfast => "veryfast",
            Self::Faster => "faster",
            Self::Fast => "fast",
            Self::Medium => "medium",
            Self::Slow => "slow",
            Self::Slower => "slower",
            Self::Veryslow => "veryslow",
        }
    }
}

impl std::str::FromStr for EncoderPreset {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ultrafast" => Ok(Self::Ultrafast),
            "superfast" => Ok(Self::Superfast),
            "veryfast" => Ok(Self::Veryfast),
            "faster" => Ok(Self::Faster),
            "fast" => Ok(Self::Fast),
            "medium" => Ok(Self::Medium),
            "slow" => Ok(Self::Slow),
            "slower" => Ok(Self::Slower),
            "veryslow" => Ok(Self::Veryslow),
            _ => Err(ParseError::new("preset", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderProfile {
    Baseline,
    Main,
    #[default]
    High,
}

impl EncoderProfile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Main => "main",
            Self::High => "high",
        }
    }
}

/// Byte-stream format the encoder session emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuxFormat {
    Flv,
    #[default]
    MpegTs,
    /// Fragmented MP4, playable up to the last complete fragment.
    FragmentedMp4,
    Matroska,
}

impl MuxFormat {
    /// Transcoder `-f` value.
    pub fn transcoder_format(self) -> &'static str {
        match self {
            Self::Flv => "flv",
            Self::MpegTs => "mpegts",
            Self::FragmentedMp4 => "mp4",
            Self::Matroska => "matroska",
        }
    }

    /// Extra muxer arguments needed to write to a non-seekable pipe.
    pub fn muxer_args(self) -> &'static [&'static str] {
        match self {
            Self::FragmentedMp4 => &["-movflags", "frag_keyframe+empty_moov+default_base_moof"],
            Self::Flv => &["-flvflags", "no_duration_filesize"],
            Self::MpegTs | Self::Matroska => &[],
        }
    }
}

/// Bitrate used when none is configured, in kbps.
pub fn recommended_bitrate_kbps(width: u32, height: u32, fps: u32) -> u32 {
    let pixels = width as u64 * height as u64;
    let high_fps = fps > 30;
    let kbps = if pixels >= 3840 * 2160 {
        if high_fps {
            51_000
        } else {
            45_000
        }
    } else if pixels >= 2560 * 1440 {
        if high_fps {
            24_000
        } else {
            16_000
        }
    } else if pixels >= 1920 * 1080 {
        if high_fps {
            9_000
        } else {
            6_000
        }
    } else if pixels >= 1280 * 720 {
        if high_fps {
            6_000
        } else {
            4_500
        }
    } else {
        3_000
    };
    kbps.max(500)
}

/// What to encode and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,

    /// Target bitrate. `0` selects [`recommended_bitrate_kbps`].
    pub bitrate_kbps: u32,
    pub max_bitrate_kbps: Option<u32>,
    pub buffer_size_kbps: Option<u32>,

    /// Constant quality mode for the software backend.
    pub crf: Option<u8>,

    /// Frames between keyframes. `0` means two seconds.
    pub keyframe_interval: u32,
    pub preset: EncoderPreset,
    pub profile: EncoderProfile,
    pub b_frames: u32,
    pub low_latency: bool,

    /// Backends tried by `open`, in order.
    pub backend_preference: Vec<BackendKind>,

    pub audio_bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u16,

    pub mux: MuxFormat,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate_kbps: 0,
            max_bitrate_kbps: None,
            buffer_size_kbps: None,
            crf: None,
            keyframe_interval: 0,
            preset: EncoderPreset::Veryfast,
            profile: EncoderProfile::High,
            b_frames: 2,
            low_latency: true,
            backend_preference: BackendKind::platform_default_preference(),
            audio_bitrate_kbps: 160,
            sample_rate: 48_000,
            channels: 2,
            mux: MuxFormat::MpegTs,
        }
    }
}

impl EncoderConfig {
    pub fn effective_bitrate_kbps(&self) -> u32 {
        if self.bitrate_kbps == 0 {
            recommended_bitrate_kbps(self.width, self.height, self.fps)
        } else {
            self.bitrate_kbps
        }
    }

    pub fn effective_keyframe_interval(&self) -> u32 {
        if self.keyframe_interval == 0 {
            self.fps.max(1) * 2
        } else {
            self.keyframe_interval
        }
    }

    /// Check for values no backend can honor.
    pub fn validate(&self) -> Result<(), String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("invalid resolution {}x{}", self.width, self.height));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(format!(
                "resolution {}x{} must have even dimensions",
                self.width, self.height
            ));
        }
        if self.fps == 0 || self.fps > 240 {
            return Err(format!("invalid frame rate {}", self.fps));
        }
        if self.sample_rate == 0 || self.channels == 0 {
            return Err("audio sample rate and channels must be non-zero".to_string());
        }
        if self.backend_preference.is_empty() {
            return Err("backend preference list is empty".to_string());
        }
        if let Some(crf) = self.crf {
            if crf > 51 {
                return Err(format!("crf {crf} is outside 0..=51"));
            }
        }
        Ok(())
    }
}

/// One backend that failed during `open`, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendFailure {
    pub backend: BackendKind,
    pub reason: String,
}

impl std::fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.backend, self.reason)
    }
}
