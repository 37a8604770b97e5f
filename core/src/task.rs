use std::future::Future;

/// Spawn a detached task. Completion handlers spawned here must re-check
/// view liveness after every await; a destroyed view turns them into no-ops.
pub fn spawn<F>(future: F)
where
    F: Future + Send + 'static,
    F::Output: Send,
{
    tokio::spawn(future);
}
