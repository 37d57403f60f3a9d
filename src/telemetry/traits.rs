//! Telemetry producer abstractions

use anyhow::Result;
use async_trait::async_trait;
use simulator_shared::PropertyMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where a telemetry producer hands its payloads
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, fields: PropertyMap) -> Result<()>;
}

/// One group of events a device sends per pass of its send loop
#[async_trait]
pub trait TelemetryEvent: Send + Sync {
    /// Produce this group's payloads. Returns early, without error, once `token` is cancelled.
    async fn send_events(&self, token: &CancellationToken, sink: &dyn EventSink) -> Result<()>;
}

/// Runtime knobs of a controllable telemetry producer
pub trait TelemetryController: Send + Sync {
    fn set_telemetry_active(&self, active: bool);

    fn telemetry_active(&self) -> bool;

    /// Toggle the external temperature channel
    fn set_external_temperature_active(&self, active: bool);

    /// Move the temperature range so it centres on `set_point`
    fn change_set_point_temperature(&self, set_point: f64);

    fn temperature_mean_value(&self) -> f64;

    /// Current sampling interval; zero while telemetry is stopped
    fn telemetry_interval(&self) -> Duration;
}

/// Sleep unless cancelled first; returns false on cancellation
pub async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
