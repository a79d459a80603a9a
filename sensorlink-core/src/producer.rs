//! Payload producers
//!
//! A [`Producer`] is the handle sensor tasks use to hand payloads to the
//! pipeline. Reporting never blocks longer than the configured producer
//! timeout; when the queue stays full the reading is logged and dropped and
//! the sensor keeps sampling.
//!
//! Periodic sensors implement [`Sampler`] and run on their own task via
//! [`Producer::spawn_sampler`].

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::errors::QueueError;
use crate::payload::SensorPayload;
use crate::pipeline::Pipeline;
use crate::stats::PipelineStats;
use crate::time::{TimeSource, TimestampUs};

/// A periodically polled sensor
pub trait Sampler: Send + 'static {
    /// Name used in log messages
    fn name(&self) -> &str;

    /// Take a reading at `now_us`
    ///
    /// `None` means nothing to report this time, e.g. the sensor's own
    /// report period has not elapsed yet.
    fn sample(&mut self, now_us: TimestampUs) -> Option<SensorPayload>;
}

/// Reports payloads into a pipeline
#[derive(Debug, Clone)]
pub struct Producer {
    pipeline: Arc<Pipeline>,
}

impl Producer {
    /// Producer for `pipeline`
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }

    /// Enqueue `payload`, waiting up to the producer timeout
    ///
    /// On failure the payload is gone; the error is only informational.
    pub async fn report(&self, payload: SensorPayload) -> Result<(), QueueError> {
        let sensor = payload.sensor_name().clone();
        let timestamp = payload.timestamp();
        let timeout = self.pipeline.config().producer_timeout();

        match self.pipeline.queue().push(payload, timeout).await {
            Ok(()) => {
                debug!("Queued {} reading at {}", sensor, timestamp);
                Ok(())
            }
            Err(err) => {
                PipelineStats::bump(&self.pipeline.stats().payloads_dropped);
                warn!("Dropped {} reading at {}: {}", sensor, timestamp, err);
                Err(err)
            }
        }
    }

    /// Poll `sampler` every `period` until `shutdown` is cancelled
    ///
    /// Readings are timestamped from `clock`. Missed ticks are delayed, not
    /// bunched up.
    pub fn spawn_sampler<S, C>(
        &self,
        mut sampler: S,
        period: Duration,
        clock: Arc<C>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()>
    where
        S: Sampler,
        C: TimeSource + Send + Sync + 'static,
    {
        let producer = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Sampler {} started, period {:?}", sampler.name(), period);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Some(payload) = sampler.sample(clock.now_us()) {
                    // a dropped reading is already logged
                    let _ = producer.report(payload).await;
                }
            }

            info!("Sampler {} stopped", sampler.name());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::payload::PayloadBuilder;
    use crate::time::{FixedTime, ReportSchedule};

    fn reading(t: u64) -> SensorPayload {
        PayloadBuilder::new("sound", t).float("db", 40.0).build().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_drops_and_continues() {
        let config = PipelineConfig::default().payload_queue_capacity(1);
        let pipeline = Arc::new(Pipeline::new(config).unwrap());
        let producer = pipeline.producer();

        producer.report(reading(1)).await.unwrap();
        assert_eq!(producer.report(reading(2)).await, Err(QueueError::Full));
        assert_eq!(pipeline.stats().snapshot().payloads_dropped, 1);

        pipeline.queue().pop(None).await.unwrap();
        producer.report(reading(3)).await.unwrap();
        assert_eq!(pipeline.queue().pop(None).await.unwrap().timestamp(), 3);
    }

    struct Counter {
        schedule: ReportSchedule,
    }

    impl Sampler for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn sample(&mut self, now_us: TimestampUs) -> Option<SensorPayload> {
            self.schedule.due(now_us).then(|| reading(now_us))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_reports_until_cancelled() {
        let pipeline = Arc::new(Pipeline::new(PipelineConfig::default()).unwrap());
        let shutdown = CancellationToken::new();
        let sampler = Counter {
            schedule: ReportSchedule::every_ms(1000),
        };

        // frozen clock: only the first sample is due
        let task = pipeline.producer().spawn_sampler(
            sampler,
            Duration::from_millis(100),
            Arc::new(FixedTime::new(5)),
            shutdown.clone(),
        );
        tokio::time::sleep(Duration::from_millis(550)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(pipeline.queue().len(), 1);
        assert_eq!(pipeline.queue().pop(None).await.unwrap().timestamp(), 5);
    }
}
