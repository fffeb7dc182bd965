use std::future::Future;

use tokio::select;
use tokio_util::sync::CancellationToken;

#[derive(thiserror::Error, Debug)]
pub enum MigrationError {
    #[error("migration cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl MigrationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MigrationError::Cancelled)
    }
}

/// Run `fut` until it completes or `token` is cancelled. A cancelled future is
/// dropped at its current suspension point.
pub async fn cancellable<T>(
    token: &CancellationToken,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> Result<T, MigrationError> {
    select! {
        biased;
        () = token.cancelled() => Err(MigrationError::Cancelled),
        result = fut => result.map_err(MigrationError::Failed),
    }
}
