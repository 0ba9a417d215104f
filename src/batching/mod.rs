mod batch;
mod scheduler;
mod stream;

pub use batch::Batch;
pub use scheduler::{BatchPlan, BatchScheduler};
pub use stream::BatchStream;
