//! Transcoder argument builders, one per backend family.

use golive_media_model::{BackendKind, EncoderConfig, EncoderPreset, VideoCodec};

const VAAPI_DEVICE: &str = "/dev/dri/renderD128";

fn push(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

fn kbps(value: u32) -> String {
    format!("{value}k")
}

/// NVENC preset for an x264-style preset name.
pub fn nvenc_preset(preset: EncoderPreset) -> &'static str {
    match preset {
        EncoderPreset::Ultrafast => "p1",
        EncoderPreset::Superfast => "p2",
        EncoderPreset::Veryfast => "p3",
        EncoderPreset::Faster => "p4",
        EncoderPreset::Fast => "p5",
        EncoderPreset::Medium => "p6",
        EncoderPreset::Slow | EncoderPreset::Slower | EncoderPreset::Veryslow => "p7",
    }
}

fn qsv_preset(preset: EncoderPreset) -> &'static str {
    match preset {
        EncoderPreset::Ultrafast | EncoderPreset::Superfast => "veryfast",
        other => other.as_str(),
    }
}

fn amf_quality(preset: EncoderPreset) -> &'static str {
    match preset {
        EncoderPreset::Ultrafast
        | EncoderPreset::Superfast
        | EncoderPreset::Veryfast
        | EncoderPreset::Faster => "speed",
        EncoderPreset::Fast | EncoderPreset::Medium => "balanced",
        _ => "quality",
    }
}

/// Arguments that must precede the first input (device setup).
pub fn hw_init_args(backend: BackendKind) -> Vec<String> {
    match backend {
        BackendKind::Vaapi => vec!["-vaapi_device".to_string(), VAAPI_DEVICE.to_string()],
        _ => Vec::new(),
    }
}

/// Filter that moves frames into the form the encoder accepts.
pub fn video_filter(backend: BackendKind) -> Option<&'static str> {
    match backend {
        BackendKind::Vaapi => Some("format=nv12,hwupload"),
        _ => None,
    }
}

fn optional_rate_limits(args: &mut Vec<String>, config: &EncoderConfig) {
    if let Some(max) = config.max_bitrate_kbps {
        push(args, &["-maxrate", kbps(max).as_str()]);
    }
    if let Some(buf) = config.buffer_size_kbps {
        push(args, &["-bufsize", kbps(buf).as_str()]);
    }
}

/// Video encoder arguments for `backend`.
pub fn video_encoder_args(backend: BackendKind, config: &EncoderConfig) -> Vec<String> {
    let bitrate = config.effective_bitrate_kbps();
    let gop = config.effective_keyframe_interval().to_string();
    let mut args = Vec::new();

    push(&mut args, &["-c:v", backend.encoder_name(config.codec)]);

    match backend {
        BackendKind::Nvenc => {
            push(
                &mut args,
                &[
                    "-preset",
                    nvenc_preset(config.preset),
                    "-rc",
                    "cbr",
                    "-b:v",
                    kbps(bitrate).as_str(),
                    "-maxrate",
                    kbps(bitrate).as_str(),
                    "-bufsize",
                    kbps(bitrate * 2).as_str(),
                    "-bf",
                    config.b_frames.min(2).to_string().as_str(),
                ],
            );
            if config.low_latency {
                push(&mut args, &["-zerolatency", "1", "-delay", "0"]);
            }
        }
        BackendKind::VideoToolbox => {
            push(&mut args, &["-b:v", kbps(bitrate).as_str()]);
            optional_rate_limits(&mut args, config);
            if config.low_latency {
                push(&mut args, &["-realtime", "1"]);
            }
        }
        BackendKind::Qsv => {
            push(
                &mut args,
                &["-preset", qsv_preset(config.preset), "-b:v", kbps(bitrate).as_str()],
            );
            optional_rate_limits(&mut args, config);
            if config.low_latency {
                push(&mut args, &["-look_ahead", "0"]);
            }
        }
        BackendKind::Amf => {
            push(
                &mut args,
                &[
                    "-quality",
                    amf_quality(config.preset),
                    "-rc",
                    "cbr",
                    "-b:v",
                    kbps(bitrate).as_str(),
                ],
            );
            optional_rate_limits(&mut args, config);
            if config.low_latency {
                push(&mut args, &["-usage", "ultralowlatency"]);
            }
        }
        BackendKind::Vaapi => {
            push(&mut args, &["-rc_mode", "CBR", "-b:v", kbps(bitrate).as_str()]);
            optional_rate_limits(&mut args, config);
        }
        BackendKind::Software => {
            push(&mut args, &["-preset", config.preset.as_str()]);
            match config.crf {
                Some(crf) => push(&mut args, &["-crf", crf.to_string().as_str()]),
                None => {
                    push(&mut args, &["-b:v", kbps(bitrate).as_str()]);
                    optional_rate_limits(&mut args, config);
                }
            }
            push(&mut args, &["-bf", config.b_frames.to_string().as_str()]);
            if config.low_latency {
                push(&mut args, &["-tune", "zerolatency"]);
            }
        }
    }

    // H.264 profiles; HEVC encoders use their own names.
    if config.codec == VideoCodec::H264 && backend != BackendKind::Vaapi {
        push(&mut args, &["-profile:v", config.profile.as_str()]);
    }

    push(&mut args, &["-g", gop.as_str(), "-keyint_min", gop.as_str(), "-sc_threshold", "0"]);
    if video_filter(backend).is_none() {
        push(&mut args, &["-pix_fmt", "yuv420p"]);
    }
    args
}

/// Full argument list for a live session.
///
/// Audio arrives as `f32le` over a loopback TCP connection (input 0), raw
/// RGBA video on stdin (input 1). The muxed stream goes to stdout.
pub fn session_args(backend: BackendKind, config: &EncoderConfig, audio_port: u16) -> Vec<String> {
    let mut args = Vec::new();
    push(&mut args, &["-hide_banner", "-loglevel", "warning"]);
    args.extend(hw_init_args(backend));

    push(
        &mut args,
        &[
            "-thread_queue_size",
            "512",
            "-f",
            "f32le",
            "-ar",
            config.sample_rate.to_string().as_str(),
            "-ac",
            config.channels.to_string().as_str(),
            "-i",
            format!("tcp://127.0.0.1:{audio_port}").as_str(),
        ],
    );
    push(
        &mut args,
        &[
            "-thread_queue_size",
            "64",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            format!("{}x{}", config.width, config.height).as_str(),
            "-framerate",
            config.fps.to_string().as_str(),
            "-i",
            "pipe:0",
        ],
    );
    push(&mut args, &["-map", "1:v:0", "-map", "0:a:0"]);

    if let Some(filter) = video_filter(backend) {
        push(&mut args, &["-vf", filter]);
    }
    args.extend(video_encoder_args(backend, config));

    push(
        &mut args,
        &[
            "-c:a",
            "aac",
            "-b:a",
            kbps(config.audio_bitrate_kbps).as_str(),
            "-ar",
            config.sample_rate.to_string().as_str(),
            "-ac",
            config.channels.to_string().as_str(),
        ],
    );
    push(&mut args, config.mux.muxer_args());
    push(&mut args, &["-f", config.mux.transcoder_format(), "pipe:1"]);
    args
}

/// Short synthetic encode used to check that a backend works on this host.
pub fn test_encode_args(backend: BackendKind, config: &EncoderConfig) -> Vec<String> {
    let mut args = Vec::new();
    push(&mut args, &["-hide_banner", "-loglevel", "error"]);
    args.extend(hw_init_args(backend));
    push(
        &mut args,
        &[
            "-f",
            "lavfi",
            "-i",
            format!("testsrc=duration=1:size=320x240:rate={}", config.fps.max(1)).as_str(),
        ],
    );
    if let Some(filter) = video_filter(backend) {
        push(&mut args, &["-vf", filter]);
    }
    args.extend(video_encoder_args(backend, config));
    push(&mut args, &["-frames:v", "5", "-f", "null", "-"]);
    args
}
