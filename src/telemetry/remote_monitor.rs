//! Cooler telemetry: temperature, humidity and optional external temperature

use super::sample_data::{RandomSource, SampleDataError, SampleDataGenerator};
use super::traits::{sleep_or_cancel, EventSink, TelemetryController, TelemetryEvent};
use anyhow::Result;
use async_trait::async_trait;
use simulator_shared::{PropertyMap, Value};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Peaks are spaced this far apart, in wall-clock seconds
const PEAK_FREQUENCY_SECS: u64 = 90;

struct MonitorState {
    telemetry_active: bool,
    external_temperature_active: bool,
    temperature: SampleDataGenerator,
    humidity: SampleDataGenerator,
    external_temperature: SampleDataGenerator,
}

/// Infinite telemetry producer that the cooler commands control
pub struct RemoteMonitorTelemetry {
    device_id: String,
    interval: Duration,
    state: Mutex<MonitorState>,
}

impl RemoteMonitorTelemetry {
    /// `random` is called once per generator
    pub fn new(
        device_id: impl Into<String>,
        interval: Duration,
        mut random: impl FnMut() -> Box<dyn RandomSource>,
    ) -> Result<Self, SampleDataError> {
        let interval_secs = interval.as_secs().max(1);
        let peak_interval = PEAK_FREQUENCY_SECS.div_ceil(interval_secs);

        Ok(Self {
            device_id: device_id.into(),
            interval,
            state: Mutex::new(MonitorState {
                telemetry_active: true,
                external_temperature_active: false,
                temperature: SampleDataGenerator::with_peaks(33.0, 36.0, 42.0, peak_interval, random())?,
                humidity: SampleDataGenerator::new(20.0, 50.0, random())?,
                external_temperature: SampleDataGenerator::new(-20.0, 120.0, random())?,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next sample, or `None` while telemetry is stopped
    fn sample(&self) -> Option<PropertyMap> {
        let mut state = self.state();
        if !state.telemetry_active {
            return None;
        }

        let mut fields = PropertyMap::new();
        fields.insert("DeviceId".into(), Value::text(self.device_id.clone()));
        fields.insert("Temperature".into(), Value::number(state.temperature.next_value()));
        fields.insert("Humidity".into(), Value::number(state.humidity.next_value()));
        if state.external_temperature_active {
            fields.insert(
                "ExternalTemperature".into(),
                Value::number(state.external_temperature.next_value()),
            );
        }
        Some(fields)
    }
}

#[async_trait]
impl TelemetryEvent for RemoteMonitorTelemetry {
    async fn send_events(&self, token: &CancellationToken, sink: &dyn EventSink) -> Result<()> {
        while !token.is_cancelled() {
            if let Some(fields) = self.sample() {
                sink.send(fields).await?;
            }
            if !sleep_or_cancel(self.interval, token).await {
                break;
            }
        }
        debug!("[TELEMETRY] {} remote monitor stopped", self.device_id);
        Ok(())
    }
}

impl TelemetryController for RemoteMonitorTelemetry {
    fn set_telemetry_active(&self, active: bool) {
        self.state().telemetry_active = active;
        info!(
            "[TELEMETRY] {} telemetry {}",
            self.device_id,
            if active { "started" } else { "stopped" }
        );
    }

    fn telemetry_active(&self) -> bool {
        self.state().telemetry_active
    }

    fn set_external_temperature_active(&self, active: bool) {
        self.state().external_temperature_active = active;
        info!(
            "[TELEMETRY] {} external temperature {}",
            self.device_id,
            if active { "on" } else { "off" }
        );
    }

    fn change_set_point_temperature(&self, set_point: f64) {
        self.state().temperature.shift_subsequent_data(set_point);
        info!("[TELEMETRY] {} set point moved to {}", self.device_id, set_point);
    }

    fn temperature_mean_value(&self) -> f64 {
        self.state().temperature.mid_point()
    }

    fn telemetry_interval(&self) -> Duration {
        if self.telemetry_active() {
            self.interval
        } else {
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn monitor(interval: Duration) -> RemoteMonitorTelemetry {
        let mut seed = 0;
        RemoteMonitorTelemetry::new("cooler-1", interval, || {
            seed += 1;
            Box::new(StdRng::seed_from_u64(seed)) as Box<dyn RandomSource>
        })
        .unwrap()
    }

    #[test]
    fn test_sample_fields_follow_controls() {
        let telemetry = monitor(Duration::from_secs(15));

        let fields = telemetry.sample().expect("active by default");
        assert!(fields.contains_key("Temperature"));
        assert!(fields.contains_key("Humidity"));
        assert!(!fields.contains_key("ExternalTemperature"));

        telemetry.set_external_temperature_active(true);
        let fields = telemetry.sample().unwrap();
        assert!(fields.contains_key("ExternalTemperature"));

        telemetry.set_telemetry_active(false);
        assert!(telemetry.sample().is_none());
        assert_eq!(telemetry.telemetry_interval(), Duration::ZERO);
    }

    #[test]
    fn test_set_point_moves_mean() {
        let telemetry = monitor(Duration::from_secs(15));
        assert!((telemetry.temperature_mean_value() - 34.5).abs() < 1e-9);

        telemetry.change_set_point_temperature(25.0);
        assert!((telemetry.temperature_mean_value() - 25.0).abs() < 1e-9);
    }
}
