use std::{fmt::Display, future::Future};

use tokio::task::JoinHandle;
use tracing::{Instrument, warn};

/// Runs `work` on its own task, detached from the caller's cancellation.
///
/// Failures are logged and otherwise ignored; callers use this only for side
/// effects whose loss is acceptable (view counts, notifications).
pub fn spawn_best_effort<F, E>(task: &'static str, work: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(
        async move {
            if let Err(err) = work.await {
                warn!(task, error = %err, "best-effort task failed");
            }
        }
        .in_current_span(),
    )
}
