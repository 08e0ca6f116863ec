use super::types::ResultPage;
use crate::error::ExecutorError;

/// Receives a query's results as they are delivered.
pub trait ResultsListener: Send + Sync {
    fn on_result(&self, page: ResultPage);

    /// A page could not be delivered (e.g. its claim check could not be fetched).
    /// Delivery continues with the next page.
    fn on_error(&self, error: ExecutorError);

    /// The channel was closed and fully drained. Called once.
    fn on_close(&self);
}

/// Adapter for callers that only care about pages.
pub struct OnResult<F>(pub F);

impl<F> ResultsListener for OnResult<F>
where
    F: Fn(ResultPage) + Send + Sync,
{
    fn on_result(&self, page: ResultPage) {
        (self.0)(page)
    }

    fn on_error(&self, error: ExecutorError) {
        tracing::warn!("Dropped result page: {}", error);
    }

    fn on_close(&self) {}
}
