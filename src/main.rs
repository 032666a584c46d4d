use clap::Parser;
use pose_tracker::{FrameId, Instance, TrackerArgs};

/// A thin smoke-run binary: wires the CLI flags into a [`Tracker`] and
/// drives it over a few synthetic frames so the assembled pipeline can be
/// exercised end to end. Reading and writing a real project's persisted
/// tracking results is out of scope here; nothing about this binary defines
/// a file format.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = TrackerArgs::parse();
    let Some(mut tracker) = args.build()? else {
        tracing::info!("--tracker None: pass-through, nothing to track");
        return Ok(());
    };

    for t in 0..8i64 {
        let shift = t as f64 * 0.4;
        let untracked = vec![
            Instance::new(
                FrameId(t),
                vec![[shift, shift], [shift + 1.0, shift + 1.0]],
                Some(0.95),
            ),
            Instance::new(
                FrameId(t),
                vec![[10.0 - shift, 10.0], [11.0 - shift, 11.0]],
                Some(0.9),
            ),
        ];

        let tracked = tracker.track(untracked, None, Some(t))?;
        for inst in &tracked {
            let name = inst.track.map(|id| tracker.tracks().get(id).name.clone());
            tracing::info!(
                t,
                track = name.as_deref(),
                score = inst.tracking_score,
                "tracked instance"
            );
        }
    }

    Ok(())
}
