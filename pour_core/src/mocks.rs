//! Test and helper sources for pour_core

use std::collections::VecDeque;
use std::time::Duration;

use pour_traits::SampleSource;

/// Replays a fixed list of readings, then behaves like a silent sensor:
/// each read blocks for the timeout and fails.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    values: VecDeque<f64>,
    repeat: Option<f64>,
}

impl ScriptedSource {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            values: values.into_iter().collect(),
            repeat: None,
        }
    }

    /// A source that returns `value` forever.
    pub fn repeating(value: f64) -> Self {
        Self {
            values: VecDeque::new(),
            repeat: Some(value),
        }
    }

    pub fn remaining(&self) -> usize {
        self.values.len()
    }
}

impl SampleSource for ScriptedSource {
    fn read(&mut self, timeout: Duration) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        if let Some(v) = self.values.pop_front().or(self.repeat) {
            return Ok(v);
        }
        std::thread::sleep(timeout);
        Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "scripted source exhausted",
        )))
    }
}
