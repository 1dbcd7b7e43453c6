use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Sleep for `delay` unless the token fires first. Returns `false` when
/// cancelled.
pub(crate) async fn pause(delay: Duration, token: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !token.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Race `fut` against the token. `None` means cancelled and `fut` dropped.
pub(crate) async fn guarded<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}
