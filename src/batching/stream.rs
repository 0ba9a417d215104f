use std::sync::Arc;

use ndarray::{s, Array3};
use tokio::{runtime::Handle, sync::mpsc};

use super::batch::Batch;

/// A lazy, finite sequence of batches over one case, produced ahead of the
/// consumer by at most the queue capacity.
///
/// The producer task slices batches out of the shared volume and blocks once
/// the queue is full; the consumer blocks on `next_batch` until the next
/// batch is ready. Exactly `steps` batches are yielded, after which the
/// stream is exhausted. A fresh stream must be spawned per epoch and is
/// never shared across cases.
pub struct BatchStream {
    rx: mpsc::Receiver<Batch>,
}

impl BatchStream {
    pub(crate) fn spawn(
        handle: &Handle,
        images: Arc<Array3<f32>>,
        labels: Option<Arc<Array3<u32>>>,
        steps: usize,
        batch_size: usize,
        queue_size: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_size);

        handle.spawn(async move {
            let slices = images.shape()[0];
            for step in 0..steps {
                let lo = step * batch_size;
                let hi = (lo + batch_size).min(slices);

                let batch = Batch::new(
                    images.slice(s![lo..hi, .., ..]).to_owned(),
                    labels.as_ref().map(|l| l.slice(s![lo..hi, .., ..]).to_owned()),
                );

                // Consumer dropped the stream; stop producing.
                if tx.send(batch).await.is_err() {
                    break;
                }
            }
        });

        Self { rx }
    }

    /// Returns the next batch, or `None` once all `steps` batches were yielded.
    ///
    /// Blocks while the producer is still preparing the next batch. Must be
    /// called from synchronous code, never from inside an async task.
    pub fn next_batch(&mut self) -> Option<Batch> {
        self.rx.blocking_recv()
    }
}
