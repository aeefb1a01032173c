use glam::DVec3;
use potree_stream::prelude::*;
use potree_stream::resource::file::FileClient;
use std::sync::Arc;
use std::time::Duration;

/// Streams a local dataset towards a fixed camera and prints what each frame
/// selected.
///
/// `cargo run --example stream_native -- assets/heidentor`
#[tokio::main]
pub async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "assets/heidentor".to_string());
    let spawner = TokioSpawner::try_current().expect("running inside a tokio runtime");

    let cloud = PointCloudOctree::open(
        &format!("file://{path}"),
        ResourceLoader::new(FileClient),
        Arc::new(DecoderPool::default()),
        Arc::new(spawner),
        OctreeSettings::default(),
    )
    .await
    .unwrap();

    let bounds = *cloud.octree().root().bounding_box();
    let center = bounds.center();
    let eye = center + bounds.size() * DVec3::new(0.8, 0.6, 0.9);

    let viewport = Viewport::new(1280, 720);
    let camera = Camera::perspective(eye, center, DVec3::Z, 60f64.to_radians(), viewport.aspect(), 0.1, 1.0e5);

    let mut scheduler = Scheduler::new(SchedulerConfig {
        point_budget: 2_000_000,
        ..SchedulerConfig::default()
    });
    let mut clouds = [cloud];

    for frame_index in 0..60 {
        let frame = scheduler.update(&mut clouds, &camera, viewport);
        println!(
            "frame {frame_index:>2}: {} nodes, {} points, {} pending, {} loads started, {} resident points{}",
            frame.visible_nodes.len(),
            frame.num_visible_points,
            frame.visible_geometry,
            frame.started_loads.len(),
            scheduler.lru().num_points(),
            if frame.node_load_failed { ", some loads failed" } else { "" },
        );

        tokio::time::sleep(Duration::from_millis(16)).await;
    }
}
