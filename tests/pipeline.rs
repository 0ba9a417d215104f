use std::num::NonZeroUsize;

use ndarray::Array3;

use segmentation_orchestration::{
    batching::BatchScheduler, CaseSource, CompileConfig, InMemorySource, LossFnConfig,
    ModelRunner, OptimizerConfig, PipelineConfig, PixelSoftmax, SegmentationModel, TsvSink,
};

const IMAGE_SHAPE: (usize, usize) = (4, 4);
const CLASSES: usize = 3;

fn config() -> PipelineConfig {
    PipelineConfig {
        image_shape: IMAGE_SHAPE,
        batch_size: NonZeroUsize::new(4).unwrap(),
        max_queue_size: NonZeroUsize::new(2).unwrap(),
        epochs: NonZeroUsize::new(2).unwrap(),
    }
}

fn compile() -> CompileConfig {
    CompileConfig {
        optimizer: OptimizerConfig::GradientDescent { lr: 0.5 },
        loss: LossFnConfig::CategoricalCrossentropy,
    }
}

fn flat_case(slices: usize, intensity: f32, class: u32) -> (Array3<f32>, Array3<u32>) {
    (
        Array3::from_elem((slices, IMAGE_SHAPE.0, IMAGE_SHAPE.1), intensity),
        Array3::from_elem((slices, IMAGE_SHAPE.0, IMAGE_SHAPE.1), class),
    )
}

fn source() -> InMemorySource {
    let mut source = InMemorySource::new();
    let (images, labels) = flat_case(10, 0.8, 1);
    source.insert("case_a", images, labels);
    let (images, labels) = flat_case(7, 0.2, 0);
    source.insert("case_b", images, labels);
    let (images, labels) = flat_case(5, 0.5, 2);
    source.insert("case007", images, labels);
    source
}

fn model(seed: u64) -> PixelSoftmax {
    PixelSoftmax::new(CLASSES, IMAGE_SHAPE, seed, compile())
}

#[test]
fn train_then_predict_annotates_every_slice() {
    let source = source();
    let mut runner = ModelRunner::new(model(7), &config()).unwrap();

    runner.train(&["case_a", "case_b"], &source).unwrap();
    let results = runner.predict(&["case_a", "case007"], &source).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id(), "case_a");
    assert_eq!(results[1].id(), "case007");

    for case in &results {
        let labels = case.labels().expect("predicted label volume");
        assert!(!labels.is_ground_truth());
        assert_eq!(labels.classes().shape()[0], case.slice_count());
        assert!(labels.classes().iter().all(|&c| (c as usize) < CLASSES));
    }
}

#[test]
fn evaluate_reports_one_tab_separated_row_per_case() {
    let source = source();
    let mut runner = ModelRunner::new(model(7), &config()).unwrap();

    let mut sink = TsvSink::new(Vec::new());
    runner.evaluate(&["case007"], &source, &mut sink).unwrap();

    let out = String::from_utf8(sink.into_inner()).unwrap();
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 1);

    let fields: Vec<&str> = lines[0].split('\t').collect();
    assert_eq!(fields.len(), 3);
    assert_eq!(fields[0], "case007");
    let loss: f64 = fields[1].parse().unwrap();
    let accuracy: f64 = fields[2].parse().unwrap();
    assert!(loss.is_finite());
    assert!(accuracy.is_finite());
}

#[test]
fn training_order_is_observable_in_weights_and_predictions() {
    let source = source();

    let mut runner_ab = ModelRunner::new(model(7), &config()).unwrap();
    runner_ab.train(&["case_a", "case_b"], &source).unwrap();

    let mut runner_ba = ModelRunner::new(model(7), &config()).unwrap();
    runner_ba.train(&["case_b", "case_a"], &source).unwrap();

    let model_ab = runner_ab.into_model();
    let model_ba = runner_ba.into_model();
    assert_ne!(model_ab.params(), model_ba.params());

    // The held-out case's class probabilities diverge as well.
    let sched = BatchScheduler::new(&config()).unwrap();
    let held_out = |mut m: PixelSoftmax| {
        let case = source.case_loader("case007", true).unwrap();
        let plan = sched.plan_predict(&case).unwrap();
        m.predict_batches(&mut plan.stream(), plan.steps()).unwrap()
    };
    let probs_ab = held_out(model_ab);
    let probs_ba = held_out(model_ba);
    assert_ne!(probs_ab, probs_ba);
}

#[test]
fn unknown_case_id_aborts_the_call() {
    let source = source();
    let mut runner = ModelRunner::new(model(7), &config()).unwrap();

    assert!(runner.train(&["case_a", "nope"], &source).is_err());
    assert!(runner.predict(&["nope"], &source).is_err());
}

#[test]
fn zero_slice_case_is_a_no_op() {
    let mut source = source();
    source.insert(
        "empty",
        Array3::zeros((0, IMAGE_SHAPE.0, IMAGE_SHAPE.1)),
        Array3::zeros((0, IMAGE_SHAPE.0, IMAGE_SHAPE.1)),
    );

    let mut runner = ModelRunner::new(model(7), &config()).unwrap();
    runner.train(&["empty"], &source).unwrap();

    let results = runner.predict(&["empty"], &source).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].slice_count(), 0);
    let labels = results[0].labels().expect("empty predicted label volume");
    assert_eq!(labels.classes().shape()[0], 0);

    let mut sink = TsvSink::new(Vec::new());
    runner.evaluate(&["empty"], &source, &mut sink).unwrap();
    let out = String::from_utf8(sink.into_inner()).unwrap();
    assert!(out.starts_with("empty\t"));
}
