//! Drive one pipeline run from the terminal.

use std::time::Duration;

use anyhow::anyhow;
use golive_common::config::AppConfig;
use golive_media_model::{PipelineHealth, PipelineState, SourceState};
use golive_pipeline::{PipelineController, PipelineServices, PipelineSpec};
use tokio::sync::broadcast::error::RecvError;

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Start `spec` and keep it running until Ctrl+C or a failure.
pub async fn run_until_interrupted(config: AppConfig, spec: PipelineSpec) -> anyhow::Result<()> {
    println!("Output: {}", spec.output.describe());
    println!(
        "Video: {}x{} @ {} fps, {} source(s)",
        spec.encoder.width,
        spec.encoder.height,
        spec.encoder.fps,
        spec.sources.len()
    );

    let services = PipelineServices::detect(&config).await;
    let mut controller = PipelineController::new(config, services);
    let mut states = controller.transitions();
    controller.start(spec).await?;

    let health = controller.health();
    if let Some(started) = health.started_at {
        println!("Started: {}", started.to_rfc3339());
    }
    if let Some(backend) = health.encoder.backend {
        println!("Encoder: {backend}");
    }
    for failure in &health.encoder.failures {
        println!("  skipped {failure}");
    }
    println!("Press Ctrl+C to stop...");
    println!();

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;

    let mut reconnecting = false;
    loop {
        if controller.state() == PipelineState::Failed {
            break;
        }
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                tracing::info!("Interrupt received");
                println!();
                println!("Stopping...");
                break;
            }
            changed = states.recv() => {
                match changed {
                    Ok(PipelineState::Reconnecting) => println!("Output disconnected; reconnecting..."),
                    Ok(PipelineState::Running) if reconnecting => println!("Output connected"),
                    Ok(PipelineState::Failed) | Err(RecvError::Closed) => break,
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                }
                reconnecting = changed == Ok(PipelineState::Reconnecting);
            }
            _ = status.tick() => print_status(&controller.health()),
        }
    }

    let stopped = controller.stop().await;
    let health = controller.health();
    print_status(&health);
    match (stopped, health.failure) {
        (Ok(()), _) => {
            println!("Stopped cleanly.");
            Ok(())
        }
        (Err(_), Some(cause)) => Err(anyhow!("Pipeline failed: {cause}")),
        (Err(e), None) => Err(e.into()),
    }
}

fn print_status(health: &PipelineHealth) {
    let render = &health.render;
    let output = &health.output;
    println!(
        "[{}] frames {} (skipped {}, dup {}, drop {}) | packets {} ({} KiB, dropped {}, reconnects {})",
        health.state,
        render.frames_composited,
        render.frames_skipped_backpressure,
        render.frames_duplicated,
        render.frames_dropped_sync,
        output.packets_written,
        output.bytes_written / 1024,
        output.packets_dropped,
        output.reconnects,
    );
    if let (Some(current), Some(recommended)) = (health.current_quality, health.recommended_quality) {
        if recommended != current {
            println!("  encoder overloaded; consider --quality {recommended:?}");
        }
    }
    for source in &health.sources {
        if source.state == SourceState::Stalled {
            println!("  source {} stalled ({} anomalies)", source.id, source.anomalies);
        }
    }
}
