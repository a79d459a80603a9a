//! Room Monitor Example
//!
//! Runs the full telemetry pipeline the way the room monitor clock does:
//! a microphone, a light sensor and the network time client report on their
//! own schedules, and batched readings go out over MQTT.
//!
//! The sensors are simulated, so the example runs on any host with a
//! broker in reach.
//!
//! ## Running the Example
//!
//! ```bash
//! MQTT_HOST=localhost MQTT_PORT=1883 cargo run --example room_monitor
//! ```
//!
//! Watch the output with any MQTT client subscribed to
//! `/IoT-Clock-RoomMonitor/DEVICE_OUT/DATA`. Stop with Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use sensorlink_connectors::mqtt::{MqttConfig, MqttTransport};
use sensorlink_core::constants::{
    LIGHT_REPORT_PERIOD_MS, SNTP_REPORT_PERIOD_MS, SOUND_REPORT_PERIOD_MS, US_PER_MS,
};
use sensorlink_core::{
    BootClock, PayloadBuilder, Pipeline, PipelineConfig, ReportSchedule, Sampler, SensorPayload,
    TimeSource, TimestampUs,
};

/// How often every sampler is polled; each decides itself whether to report
const POLL_PERIOD: Duration = Duration::from_millis(100);

/// Small deterministic noise source
struct Noise(u32);

impl Noise {
    fn next(&mut self, spread: f32) -> f32 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        (self.0 as f32 / u32::MAX as f32 - 0.5) * 2.0 * spread
    }
}

/// Averages microphone levels and reports the mean
struct SoundSampler {
    schedule: ReportSchedule,
    noise: Noise,
    sum_db: f32,
    samples: u32,
}

impl Sampler for SoundSampler {
    fn name(&self) -> &str {
        "sound"
    }

    fn sample(&mut self, now_us: TimestampUs) -> Option<SensorPayload> {
        self.sum_db += 45.0 + self.noise.next(6.0);
        self.samples += 1;
        if !self.schedule.due(now_us) {
            return None;
        }

        let mean = self.sum_db / self.samples as f32;
        self.sum_db = 0.0;
        self.samples = 0;
        PayloadBuilder::new("sound", now_us).float("db", mean).build().ok()
    }
}

/// Reports luminosity channels like a TSL2591
struct LightSampler {
    schedule: ReportSchedule,
    noise: Noise,
}

impl Sampler for LightSampler {
    fn name(&self) -> &str {
        "tsl2591"
    }

    fn sample(&mut self, now_us: TimestampUs) -> Option<SensorPayload> {
        if !self.schedule.due(now_us) {
            return None;
        }

        let lux = 320.0 + self.noise.next(40.0);
        let ir = (lux * 0.3) as u64;
        let full = (lux * 1.4) as u64;
        PayloadBuilder::new("tsl2591", now_us)
            .float("lux", lux)
            .uint("ir", ir)
            .uint("full", full)
            .uint("visible", full.saturating_sub(ir))
            .build()
            .ok()
    }
}

/// Reports time sync status and re-syncs the clock
struct SntpSampler {
    schedule: ReportSchedule,
    clock: Arc<BootClock>,
}

impl Sampler for SntpSampler {
    fn name(&self) -> &str {
        "sntp"
    }

    fn sample(&mut self, now_us: TimestampUs) -> Option<SensorPayload> {
        if !self.schedule.due(now_us) {
            return None;
        }

        let before = self.clock.utc_offset_us();
        self.clock.sync_to_system();
        let drift_us = self.clock.utc_offset_us() as i64 - before as i64;
        PayloadBuilder::new("sntp", self.clock.now_us())
            .bool("synced", self.clock.is_wall_clock())
            .long_int("drift_us", drift_us)
            .build()
            .ok()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("SensorLink Room Monitor Example");
    println!("===============================\n");

    let host = std::env::var("MQTT_HOST").unwrap_or_else(|_| "localhost".into());
    let port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(1883);

    let config = PipelineConfig::new("clock1");
    let mqtt = MqttConfig::new(&host, port)
        .client_id(config.device_id.clone())
        .control_topic("/IoT-Clock-RoomMonitor/DEVICE_IN/CONTROL");

    println!("Broker:   {}:{}", host, port);
    println!("Topic:    {}", config.data_topic);
    println!(
        "Batching: {} payloads per message, {} buffers of {} bytes\n",
        config.max_payloads_per_message,
        config.buffer_count,
        config.buffer_size()
    );

    let transport = MqttTransport::start(mqtt)?;
    let pipeline = Arc::new(Pipeline::new(config)?);
    let handle = pipeline.spawn(transport);

    let clock = Arc::new(BootClock::new());
    clock.sync_to_system();

    let producer = pipeline.producer();
    let shutdown = handle.shutdown_token();
    let samplers = vec![
        producer.spawn_sampler(
            SoundSampler {
                schedule: ReportSchedule::every_ms(SOUND_REPORT_PERIOD_MS),
                noise: Noise(7),
                sum_db: 0.0,
                samples: 0,
            },
            POLL_PERIOD,
            clock.clone(),
            shutdown.clone(),
        ),
        producer.spawn_sampler(
            LightSampler {
                schedule: ReportSchedule::every_ms(LIGHT_REPORT_PERIOD_MS),
                noise: Noise(11),
            },
            POLL_PERIOD,
            clock.clone(),
            shutdown.clone(),
        ),
        producer.spawn_sampler(
            SntpSampler {
                schedule: ReportSchedule::every_ms(SNTP_REPORT_PERIOD_MS),
                clock: clock.clone(),
            },
            Duration::from_millis(SNTP_REPORT_PERIOD_MS / 10),
            clock.clone(),
            shutdown.clone(),
        ),
    ];

    let mut status = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = status.tick() => {
                let stats = pipeline.stats().snapshot();
                let pool = pipeline.pool().snapshot();
                println!(
                    "uptime {:>6} ms | published {:>4} | failed {:>3} | dropped payloads {:>3} | free buffers {}",
                    clock.uptime_us() / US_PER_MS,
                    stats.messages_published,
                    stats.messages_failed,
                    stats.payloads_dropped,
                    pool.free
                );
            }
        }
    }

    println!("\nShutting down...");
    handle.shutdown().await;
    for sampler in samplers {
        sampler.await?;
    }

    let stats = pipeline.stats().snapshot();
    println!(
        "Done: {} batches sealed, {} published, {} reconnects",
        stats.batches_sealed, stats.messages_published, stats.reconnects
    );
    Ok(())
}
