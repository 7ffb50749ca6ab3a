use golive_media_model::{Frame, SourceId};
use golive_render_engine::{Compositor, CompositorConfig, SceneGraph, SceneNode, Synchronizer};
use proptest::prelude::*;

fn single_source_graph(id: &SourceId) -> SceneGraph {
    let mut graph = SceneGraph::default();
    graph.add(SceneNode::new("n", id.clone())).unwrap();
    graph
}

proptest! {
    #[test]
    fn selection_is_max_pts_at_or_below_target(
        gaps in prop::collection::vec(1u64..50, 1..40),
        steps in prop::collection::vec(1u64..60, 1..40),
    ) {
        let id = SourceId::new("cam");
        let graph = single_source_graph(&id);
        let mut config = CompositorConfig::new(2, 2);
        config.history = 64;
        let mut comp = Compositor::new(config);

        let mut frames = Vec::new();
        let mut pts = 0;
        for gap in gaps {
            pts += gap;
            frames.push(pts);
            comp.submit(&id, Frame::solid(pts, 2, 2, [0, 0, 0, 255]));
        }

        let mut target = 0;
        for step in steps {
            target += step;
            let out = comp.composite(&graph, target).unwrap();
            let expected = frames.iter().copied().filter(|p| *p <= target).max();
            prop_assert_eq!(out.selected_pts(&id), expected);
        }
    }

    #[test]
    fn output_pts_strictly_increase_and_corrections_are_single_frame(
        clock_steps in prop::collection::vec(0u64..100_000_000, 1..200),
    ) {
        let mut sync = Synchronizer::new(30, 1.0);
        let mut comp = Compositor::new(CompositorConfig::new(2, 2));
        let graph = SceneGraph::default();
        let mut clock = 0;
        let mut last = None;

        for step in clock_steps {
            clock += step;
            let plan = sync.plan_cycle(clock);
            prop_assert!(plan.targets.len() <= 2);
            for target in plan.targets {
                let out = comp.composite(&graph, target).unwrap();
                if let Some(prev) = last {
                    prop_assert!(out.frame.pts_ns() > prev);
                }
                last = Some(out.frame.pts_ns());
            }
        }
    }
}
