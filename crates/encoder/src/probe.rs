//! Host capability probing.
//!
//! Asks the transcoder which encoders and hardware accelerators it was
//! built with. The result is consulted once per `open`.

use std::collections::BTreeSet;

use golive_common::config::TranscoderConfig;
use golive_common::error::GoliveResult;
use golive_common::transcoder::{run_to_completion, transcoder_version};
use golive_media_model::{BackendKind, VideoCodec};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub version: Option<String>,
    /// Video encoder names, e.g. `libx264`, `h264_nvenc`.
    pub video_encoders: BTreeSet<String>,
    /// Hardware acceleration methods, e.g. `cuda`, `vaapi`.
    pub hwaccels: BTreeSet<String>,
}

impl Capabilities {
    pub fn has_encoder(&self, name: &str) -> bool {
        self.video_encoders.contains(name)
    }

    /// Whether the transcoder was built with `backend`'s encoder for `codec`.
    pub fn supports(&self, backend: BackendKind, codec: VideoCodec) -> bool {
        self.has_encoder(backend.encoder_name(codec))
    }

    /// Backends whose encoder is present, in `BackendKind::ALL` order.
    pub fn available_backends(&self, codec: VideoCodec) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|b| self.supports(*b, codec))
            .collect()
    }
}

/// Parse `-encoders` output.
///
/// Entries look like ` V....D libx264    libx264 H.264 ...`; only video
/// encoders (flag column starting with `V`) are kept.
pub fn parse_encoders(output: &str) -> BTreeSet<String> {
    let mut in_list = false;
    let mut names = BTreeSet::new();
    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("------") {
            in_list = true;
            continue;
        }
        if !in_list {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        let (Some(flags), Some(name)) = (parts.next(), parts.next()) else {
            continue;
        };
        if flags.len() == 6 && flags.starts_with('V') {
            names.insert(name.to_string());
        }
    }
    names
}

/// Parse `-hwaccels` output: a header line then one method per line.
pub fn parse_hwaccels(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.ends_with(':'))
        .map(str::to_string)
        .collect()
}

/// Query the transcoder for its encoders and accelerators.
pub async fn probe_capabilities(transcoder: &TranscoderConfig) -> GoliveResult<Capabilities> {
    let limit = transcoder.probe_timeout();
    let encoders = run_to_completion(
        &transcoder.path,
        &["-hide_banner".to_string(), "-encoders".to_string()],
        limit,
    )
    .await?;
    let hwaccels = run_to_completion(
        &transcoder.path,
        &["-hide_banner".to_string(), "-hwaccels".to_string()],
        limit,
    )
    .await?;
    let version = transcoder_version(&transcoder.path).await.ok();

    let caps = Capabilities {
        version,
        video_encoders: parse_encoders(&encoders),
        hwaccels: parse_hwaccels(&hwaccels),
    };
    tracing::info!(
        encoders = caps.video_encoders.len(),
        hwaccels = ?caps.hwaccels,
        "Probed transcoder capabilities"
    );
    Ok(caps)
}
