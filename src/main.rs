use std::{io, num::NonZeroUsize};

use anyhow::Context;
use ndarray::Array3;
use rand::{rngs::StdRng, Rng, SeedableRng};

use segmentation_orchestration::{
    CompileConfig, InMemorySource, ModelRunner, ModelStore, PipelineConfig, PixelSoftmax, TsvSink,
};

const CLASSES: usize = 3;
const IMAGE_SHAPE: (usize, usize) = (16, 16);

/// Synthetic volume whose label maps follow intensity bands, so the demo
/// baseline has something learnable.
fn synthetic_case(rng: &mut StdRng, slices: usize) -> (Array3<f32>, Array3<u32>) {
    let mut images = Array3::zeros((slices, IMAGE_SHAPE.0, IMAGE_SHAPE.1));
    let mut labels = Array3::zeros((slices, IMAGE_SHAPE.0, IMAGE_SHAPE.1));

    for ((s, y, x), v) in images.indexed_iter_mut() {
        let band = (s + y + x) % CLASSES;
        *v = band as f32 / CLASSES as f32 + rng.random_range(0.0..0.1);
        labels[[s, y, x]] = band as u32;
    }

    (images, labels)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cfg = PipelineConfig {
        image_shape: IMAGE_SHAPE,
        batch_size: NonZeroUsize::new(8).unwrap(),
        max_queue_size: NonZeroUsize::new(4).unwrap(),
        epochs: NonZeroUsize::new(3).unwrap(),
    };

    let mut rng = StdRng::seed_from_u64(42);
    let mut source = InMemorySource::new();
    for (id, slices) in [("case001", 20), ("case002", 25), ("case003", 12)] {
        let (images, labels) = synthetic_case(&mut rng, slices);
        source.insert(id, images, labels);
    }

    let compile = CompileConfig::default();
    let model = PixelSoftmax::new(CLASSES, IMAGE_SHAPE, 7, compile);
    let mut runner = ModelRunner::new(model, &cfg).context("creating pipeline")?;

    runner
        .train(&["case001", "case002"], &source)
        .context("training")?;

    let mut sink = TsvSink::new(io::stdout());
    runner
        .evaluate(&["case001", "case002"], &source, &mut sink)
        .context("evaluating")?;

    let store = ModelStore::new("model");
    store.dump(runner.model()).context("dumping artifacts")?;
    let reloaded: PixelSoftmax = store.load(compile).context("reloading artifacts")?;

    let mut runner = ModelRunner::new(reloaded, &cfg).context("recreating pipeline")?;
    let results = runner
        .predict(&["case003"], &source)
        .context("predicting")?;

    for case in &results {
        let labels = case
            .labels()
            .expect("predicted case carries a label volume");
        println!(
            "{}\t{} slices segmented (ground_truth={})",
            case.id(),
            labels.classes().shape()[0],
            labels.is_ground_truth(),
        );
    }

    Ok(())
}
