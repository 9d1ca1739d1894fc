// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Sending a heartbeat every 200ms and stopping it cleanly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use periodic::{CancellationToken, Error, PeriodicTask, StartMode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Show the task's lifecycle events
    let subscriber = tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let sequence = Arc::new(AtomicU64::new(0));
    let task = PeriodicTask::builder()
        .period(Duration::from_millis(200))
        .cancelable_callback(move |token: CancellationToken| {
            let beat = sequence.fetch_add(1, Ordering::Relaxed);
            async move {
                // Pretend the heartbeat takes a while to be acknowledged
                tokio::select! {
                    () = token.cancelled() => Err(Error::Canceled),
                    () = tokio::time::sleep(Duration::from_millis(50)) => {
                        println!("heartbeat #{beat} acknowledged");
                        Ok(())
                    }
                }
            }
        })
        .build();

    task.start(StartMode::Immediate)?;
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Waits for the in-flight heartbeat, without blocking the runtime
    task.shutdown().await;
    println!("heartbeat stopped");

    Ok(())
}
