//! The waiting side of a pending segment load

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::LoadError;
use crate::segment::{SegmentHeader, SegmentWithData};

/// Outcome delivered to each party waiting on a segment
pub type LoadResult = Result<Arc<SegmentWithData>, LoadError>;

/// Sending half held in the pending-load registry
pub(crate) type Waiter = oneshot::Sender<LoadResult>;

/// Resolves once the segment's load succeeds or fails
///
/// Usable from plain threads via [`wait`](Self::wait) or awaited from async
/// code. If the load is dropped without resolving (handler detached, actor
/// shut down) the result is [`LoadError::Dropped`].
#[derive(Debug)]
pub struct SegmentFuture {
    header: SegmentHeader,
    rx: oneshot::Receiver<LoadResult>,
}

impl SegmentFuture {
    pub(crate) fn channel(header: SegmentHeader) -> (Waiter, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { header, rx })
    }

    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    /// Block the current thread until the load resolves
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; await
    /// the future there instead.
    pub fn wait(self) -> LoadResult {
        self.rx.blocking_recv().unwrap_or_else(|_| Err(LoadError::Dropped))
    }

    /// Non-blocking check; `None` while the load is still in flight
    pub fn try_wait(&mut self) -> Option<LoadResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(LoadError::Dropped)),
        }
    }
}

impl Future for SegmentFuture {
    type Output = LoadResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(LoadError::Dropped)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{Segment, SegmentDataset};

    fn header() -> SegmentHeader {
        Segment::builder("sales", "unit_sales").build().unwrap().header()
    }

    #[test]
    fn test_wait_receives_result() {
        let segment = Arc::new(Segment::builder("sales", "unit_sales").build().unwrap());
        let resolved = Arc::new(segment.with_data(SegmentDataset::new(vec![])).unwrap());
        let (tx, future) = SegmentFuture::channel(segment.header());
        tx.send(Ok(Arc::clone(&resolved))).unwrap();
        let got = future.wait().unwrap();
        assert!(Arc::ptr_eq(&got, &resolved));
    }

    #[test]
    fn test_dropped_waiter_yields_dropped() {
        let (tx, future) = SegmentFuture::channel(header());
        drop(tx);
        assert_eq!(future.wait().unwrap_err(), LoadError::Dropped);
    }

    #[test]
    fn test_try_wait_pending_then_failed() {
        let (tx, mut future) = SegmentFuture::channel(header());
        assert!(future.try_wait().is_none());
        tx.send(Err(LoadError::Failed("boom".to_string()))).unwrap();
        assert_eq!(
            future.try_wait().unwrap().unwrap_err(),
            LoadError::Failed("boom".to_string())
        );
    }

    #[tokio::test]
    async fn test_await_from_async_context() {
        let (tx, future) = SegmentFuture::channel(header());
        tokio::spawn(async move {
            let _ = tx.send(Err(LoadError::Failed("async".to_string())));
        });
        assert!(future.await.is_err());
    }
}
