use std::io::Write;

use crate::error::Result;

/// Structured sink for per-case evaluation metrics.
pub trait EvalSink {
    /// Reports one case's `(loss, accuracy)` pair.
    ///
    /// # Errors
    /// Returns an error if the sink cannot accept the row.
    fn report(&mut self, case_id: &str, loss: f64, accuracy: f64) -> Result<()>;
}

/// Line-oriented sink writing `"{id}\t{loss}\t{accuracy}"` rows.
pub struct TsvSink<W> {
    out: W,
}

impl<W: Write> TsvSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> EvalSink for TsvSink<W> {
    fn report(&mut self, case_id: &str, loss: f64, accuracy: f64) -> Result<()> {
        writeln!(self.out, "{case_id}\t{loss}\t{accuracy}")?;
        Ok(())
    }
}
