//! Loader configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use crate::window::BatchWindow;

/// Batching behavior applied to every loader created in a request scope.
///
/// ```toml
/// [loader]
/// max_batch_size = 500
/// window = { kind = "delay", millis = 2 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// When a batch should stop collecting keys and be dispatched.
    pub window: BatchWindow,
    /// Dispatch a batch as soon as it holds this many distinct keys,
    /// regardless of the window. Unlimited when unset.
    pub max_batch_size: Option<NonZeroUsize>,
}

impl LoaderConfig {
    pub fn with_window(mut self, window: BatchWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_window(BatchWindow::delay(delay))
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = NonZeroUsize::new(max_batch_size);
        self
    }
}
