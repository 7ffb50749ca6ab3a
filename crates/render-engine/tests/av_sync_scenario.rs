//! Two video sources at mismatched rates plus one audio source, driven by
//! the audio master clock for ten seconds of output.

use std::sync::Arc;

use golive_audio_engine::AudioMixer;
use golive_common::clock::MasterClock;
use golive_media_model::{frame_pts_ns, AudioChunk, Frame, SourceId};
use golive_render_engine::{
    Compositor, CompositorConfig, Correction, SceneGraph, SceneNode, Synchronizer, Transform,
};

const OUTPUT_FPS: u32 = 30;
const SECONDS: u64 = 10;

fn expected_nearest_below(target: u64, fps: u32) -> u64 {
    let mut j = 0;
    while frame_pts_ns(j + 1, fps) <= target {
        j += 1;
    }
    frame_pts_ns(j, fps)
}

#[test]
fn thirty_and_twenty_four_fps_sources_stay_in_sync_for_ten_seconds() {
    let clock = Arc::new(MasterClock::new(48_000));
    let mut mixer = AudioMixer::new(clock.clone(), 2, 1024);
    let mut sync = Synchronizer::new(OUTPUT_FPS, 1.0);
    let mut compositor = Compositor::new(CompositorConfig::new(32, 18));

    let a = SourceId::new("a");
    let b = SourceId::new("b");
    let mut graph = SceneGraph::default();
    graph.add(SceneNode::new("a", a.clone())).unwrap();
    graph
        .add(
            SceneNode::new("b", b.clone())
                .with_z_order(1)
                .with_transform(Transform::at(16.0, 9.0)),
        )
        .unwrap();

    let mut next_a = 0u64;
    let mut next_b = 0u64;
    let mut last_pts: Option<u64> = None;
    let mut outputs = 0u64;
    // Per second: did B's selection land strictly between two output frames.
    let mut b_offset_selected = vec![false; SECONDS as usize];

    for cycle in 0..(SECONDS * OUTPUT_FPS as u64) {
        let wall_ns = frame_pts_ns(cycle, OUTPUT_FPS);

        // Audio is consumed ahead of the render cycle, one chunk at a time.
        while clock.now_ns() <= wall_ns {
            mixer.mix(&[AudioChunk::silence(0, 48_000, 2, 1024)]);
        }

        while frame_pts_ns(next_a, 30) <= wall_ns {
            let pts = frame_pts_ns(next_a, 30);
            assert!(compositor.submit(&a, Frame::solid(pts, 32, 18, [200, 0, 0, 255])));
            next_a += 1;
        }
        while frame_pts_ns(next_b, 24) <= wall_ns {
            let pts = frame_pts_ns(next_b, 24);
            assert!(compositor.submit(&b, Frame::solid(pts, 16, 9, [0, 0, 200, 255])));
            next_b += 1;
        }

        let plan = sync.plan_cycle(clock.now_ns());
        assert!(plan.targets.len() <= 2);
        assert_ne!(plan.correction, Correction::Drop, "cycle {cycle}");

        for target in plan.targets {
            let out = compositor.composite(&graph, target).unwrap();
            if let Some(prev) = last_pts {
                assert!(out.frame.pts_ns() > prev);
            }
            last_pts = Some(out.frame.pts_ns());
            outputs += 1;

            let a_pts = out.selected_pts(&a).unwrap();
            let b_pts = out.selected_pts(&b).unwrap();
            assert!(a_pts <= target);
            assert!(b_pts <= target);
            assert_eq!(a_pts, expected_nearest_below(target, 30));
            assert_eq!(b_pts, expected_nearest_below(target, 24));
            if b_pts < target {
                b_offset_selected[(target / 1_000_000_000) as usize] = true;
            }
        }
    }

    assert_eq!(outputs, SECONDS * OUTPUT_FPS as u64);
    assert_eq!(sync.next_target_pts(), SECONDS * 1_000_000_000);
    assert!(b_offset_selected.iter().all(|hit| *hit));
}

#[test]
fn audio_clock_lag_is_absorbed_one_frame_per_cycle() {
    let clock = Arc::new(MasterClock::new(48_000));
    let mut mixer = AudioMixer::new(clock.clone(), 2, 1024);
    let mut sync = Synchronizer::new(OUTPUT_FPS, 1.0);

    // Audio stalls for half a second, then catches up in one burst.
    let mut targets = Vec::new();
    for cycle in 0..60u64 {
        let wall_ns = frame_pts_ns(cycle, OUTPUT_FPS);
        if !(10..25).contains(&cycle) {
            while clock.now_ns() <= wall_ns {
                mixer.mix(&[AudioChunk::silence(0, 48_000, 2, 1024)]);
            }
        }
        let plan = sync.plan_cycle(clock.now_ns());
        assert!(plan.targets.len() <= 2);
        targets.extend(plan.targets);
    }

    for pair in targets.windows(2) {
        assert!(pair[1] > pair[0]);
        assert!(pair[1] - pair[0] <= 33_333_334);
    }
    let drift = sync.drift_frames(clock.now_ns());
    assert!(drift.abs() <= 1.0, "drift {drift}");
}
