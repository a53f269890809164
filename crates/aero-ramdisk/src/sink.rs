use crate::Result;

/// Opaque value chosen by the requester to match completions to requests.
pub type RequestToken = u64;

/// Receiver of asynchronous request completions.
///
/// `complete` is invoked exactly once per accepted request, with the number of bytes moved or
/// the reason the request failed. It may run on whichever thread issued the request.
pub trait CompletionSink: Send + Sync {
    fn complete(&self, token: RequestToken, status: Result<u64>);
}

impl<F> CompletionSink for F
where
    F: Fn(RequestToken, Result<u64>) + Send + Sync,
{
    fn complete(&self, token: RequestToken, status: Result<u64>) {
        self(token, status)
    }
}
