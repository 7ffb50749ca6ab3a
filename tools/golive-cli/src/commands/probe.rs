//! Show transcoder capabilities and usable encoder backends.

use golive_common::config::AppConfig;
use golive_encoder::probe_capabilities;
use golive_media_model::{BackendKind, VideoCodec};

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    println!("GoLive Encoder Probe");
    println!("{}", "=".repeat(50));
    println!("Transcoder: {}", config.transcoder.path.display());

    let caps = probe_capabilities(&config.transcoder).await?;
    match &caps.version {
        Some(version) => println!("[OK] Version: {version}"),
        None => println!("[WARN] Version: unknown"),
    }
    println!(
        "Hardware acceleration: {}",
        if caps.hwaccels.is_empty() {
            "none".to_string()
        } else {
            caps.hwaccels.iter().cloned().collect::<Vec<_>>().join(", ")
        }
    );
    println!();

    for codec in [VideoCodec::H264, VideoCodec::Hevc] {
        println!("{codec:?}:");
        for backend in BackendKind::ALL {
            let name = backend.encoder_name(codec);
            let mark = if caps.supports(backend, codec) { "OK" } else { "--" };
            println!("  [{mark}] {:<13} {name}", backend.as_str());
        }
    }

    println!();
    let preferred: Vec<String> = BackendKind::platform_default_preference()
        .into_iter()
        .filter(|b| caps.supports(*b, VideoCodec::H264))
        .map(|b| b.to_string())
        .collect();
    if preferred.is_empty() {
        println!("No H.264 encoder is available. Install a transcoder build with libx264.");
    } else {
        println!("Default order on this host: {}", preferred.join(" > "));
    }
    Ok(())
}
