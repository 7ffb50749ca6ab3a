//! Verify the transcoder and, optionally, a pipeline spec.

use std::path::PathBuf;
use std::sync::Arc;

use golive_common::config::AppConfig;
use golive_encoder::{probe_capabilities, EncoderBackend, TranscoderBackend};
use golive_media_model::{BackendKind, EncoderConfig};
use golive_pipeline::PipelineSpec;

use super::load_spec;

pub async fn run(config: AppConfig, spec: Option<PathBuf>) -> anyhow::Result<()> {
    println!("GoLive System Check");
    println!("{}", "=".repeat(50));

    let mut ok = check_transcoder(&config).await;

    if let Some(path) = spec {
        println!();
        ok &= check_spec(&path)?;
    }

    println!();
    if ok {
        println!("Everything needed to go live is available.");
        Ok(())
    } else {
        anyhow::bail!("Some checks failed. See above.")
    }
}

async fn check_transcoder(config: &AppConfig) -> bool {
    let caps = match probe_capabilities(&config.transcoder).await {
        Ok(caps) => caps,
        Err(e) => {
            println!("[FAIL] Transcoder {}: {e}", config.transcoder.path.display());
            return false;
        }
    };
    println!(
        "[OK] Transcoder: {} ({})",
        config.transcoder.path.display(),
        caps.version.as_deref().unwrap_or("unknown version")
    );

    let caps = Arc::new(caps);
    let test_config = EncoderConfig {
        width: 320,
        height: 180,
        ..Default::default()
    };
    let mut usable = 0;
    for kind in BackendKind::platform_default_preference() {
        let backend = TranscoderBackend::new(kind, config.transcoder.clone(), Some(caps.clone()));
        match backend.check(&test_config).await {
            Ok(()) => {
                usable += 1;
                println!("[OK] Encoder backend: {kind}");
            }
            Err(e) => println!("[--] Encoder backend: {kind} ({e})"),
        }
    }
    if usable == 0 {
        println!("[FAIL] No encoder backend can encode on this host.");
    }
    usable > 0
}

fn check_spec(path: &std::path::Path) -> anyhow::Result<bool> {
    let spec: PipelineSpec = load_spec(path)?;
    println!("Spec: {}", path.display());
    println!("  Output: {}", spec.output.describe());
    let encoder = spec.effective_encoder();
    println!(
        "  Encoder: {:?} {}x{} @ {} fps, {} kbps, mux {:?}",
        encoder.codec,
        encoder.width,
        encoder.height,
        encoder.fps,
        encoder.effective_bitrate_kbps(),
        encoder.mux
    );
    let backends: Vec<String> = encoder.backend_preference.iter().map(ToString::to_string).collect();
    println!("  Backends: {}", backends.join(" > "));
    for source in &spec.sources {
        println!(
            "  Source {} ({}) {}x{} @ {} fps{}",
            source.id,
            source.kind.registry_key(),
            source.width,
            source.height,
            source.fps,
            if source.audio { " +audio" } else { "" }
        );
    }
    println!("  Scene nodes: {}", spec.scene.len());

    Ok(match spec.validate() {
        Ok(()) => {
            println!("[OK] Spec is valid.");
            true
        }
        Err(e) => {
            println!("[FAIL] {e}");
            false
        }
    })
}
