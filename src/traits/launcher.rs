use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::protocol::{WorkerResult, WorkerSpec};

/// Runs one invocation and reports how it ended.
///
/// Implementations never fail: spawn errors, crashes, timeouts and
/// cancellations all come back as a [`WorkerResult`] with the matching
/// error kind. Cancelling `cancel` asks the worker to stop; the launcher
/// escalates to a kill after the spec's `kill_after`.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, spec: WorkerSpec, cancel: CancellationToken) -> WorkerResult;

    fn name(&self) -> &'static str;
}
