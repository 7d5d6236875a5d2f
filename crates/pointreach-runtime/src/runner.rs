//! Periodic driver for a [`TransformPipeline`].

use pointreach_types::ReachError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::pipeline::TransformPipeline;

/// Handle to a pipeline ticking on its own task.
pub struct PipelineHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<TransformPipeline>,
}

impl PipelineHandle {
    /// Start ticking `pipeline` at its configured period.
    ///
    /// Late ticks are skipped rather than bunched up. Must be called from
    /// within a Tokio runtime.
    pub fn spawn(mut pipeline: TransformPipeline) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let period = pipeline.config().period;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period_ms = period.as_millis() as u64, "pipeline runner started");

            loop {
                tokio::select! {
                    biased;
                    // A dropped handle stops the runner as well.
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {
                        pipeline.tick();
                    }
                }
            }

            pipeline.close();
            pipeline
        });

        Self { stop_tx, task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop after the in-flight tick, close the devices and hand the
    /// pipeline back.
    ///
    /// # Errors
    ///
    /// Returns [`ReachError::Channel`] if the runner task panicked.
    pub async fn stop(self) -> Result<TransformPipeline, ReachError> {
        let _ = self.stop_tx.send(true);
        self.task
            .await
            .map_err(|e| ReachError::Channel(format!("pipeline runner failed: {e}")))
    }
}
