//! The batch window: the scheduling tick that decides when an accumulating
//! batch is dispatched.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use futures_timer::Delay;
use serde::Deserialize;

/// How long a batch keeps collecting keys once it is created.
///
/// The window opens with the batch, at the first load of an uncached key, so
/// a `Delay` counts from that load. It is only ever polled by the batch's
/// driving future, and every key requested before it completes lands in the
/// batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchWindow {
    /// Dispatch as soon as the batch is first polled.
    Immediate,
    /// Yield to the executor once before dispatching. Sibling futures polled
    /// in the same pass, and tasks scheduled before the driver is re-polled,
    /// join the batch.
    #[default]
    Yield,
    /// Wait for a fixed delay.
    Delay { millis: u64 },
}

impl BatchWindow {
    pub fn delay(duration: Duration) -> Self {
        BatchWindow::Delay {
            millis: duration.as_millis() as u64,
        }
    }

    pub(crate) fn open(&self) -> BoxFuture<'static, ()> {
        match *self {
            BatchWindow::Immediate => future::ready(()).boxed(),
            BatchWindow::Yield => YieldNow::default().boxed(),
            BatchWindow::Delay { millis } => Delay::new(Duration::from_millis(millis)).boxed(),
        }
    }
}

/// Returns pending exactly once, waking itself so the executor re-polls it
/// after every other ready task has had a turn.
#[derive(Debug, Default)]
struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }

        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
