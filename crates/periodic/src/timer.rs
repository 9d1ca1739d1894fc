// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::pin::pin;
use std::time::Duration;

use futures::future::{Either, select};
use tokio_util::sync::CancellationToken;

use crate::{Error, Executor, Result};

/// Waits for `period` on the executor's timer, or until `token` is cancelled.
///
/// Cancellation wins over an elapsed delay when both are ready at the same poll, so a
/// stopped task never invokes its callback after the wait that was interrupted.
pub(crate) async fn wait(executor: &Executor, period: Duration, token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(Error::Canceled);
    }

    let cancelled = pin!(token.cancelled());
    let delay = executor.delay(period);

    match select(cancelled, delay).await {
        Either::Left(((), _)) => Err(Error::Canceled),
        Either::Right(((), _)) => Ok(()),
    }
}
