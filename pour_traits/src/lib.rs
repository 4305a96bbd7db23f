//! Hardware seams shared across the pour workspace.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// A source of raw weight readings in grams.
///
/// Serial framing and device parsing live behind this trait; the core only
/// sees one scalar per successful read.
pub trait SampleSource {
    fn read(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>>;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn read(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read(timeout)
    }
}
