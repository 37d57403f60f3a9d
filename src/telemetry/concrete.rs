//! Fixed, pre-defined telemetry payloads

use super::traits::{sleep_or_cancel, EventSink, TelemetryEvent};
use anyhow::Result;
use async_trait::async_trait;
use simulator_shared::PropertyMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How many times a concrete group replays its payload list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Times(u32),
    Forever,
}

/// Sends the same payload list, waiting `delay_before` ahead of every payload
#[derive(Debug, Clone)]
pub struct ConcreteTelemetry {
    pub payloads: Vec<PropertyMap>,
    pub delay_before: Duration,
    pub repeat: Repeat,
}

impl ConcreteTelemetry {
    pub fn new(payloads: Vec<PropertyMap>, delay_before: Duration, repeat: Repeat) -> Self {
        Self {
            payloads,
            delay_before,
            repeat,
        }
    }
}

#[async_trait]
impl TelemetryEvent for ConcreteTelemetry {
    async fn send_events(&self, token: &CancellationToken, sink: &dyn EventSink) -> Result<()> {
        if self.payloads.is_empty() {
            // nothing to replay; a forever group holds until cancelled
            if self.repeat == Repeat::Forever {
                token.cancelled().await;
            }
            return Ok(());
        }

        let mut round = 0u32;
        loop {
            match self.repeat {
                Repeat::Times(count) if round >= count => return Ok(()),
                _ => {}
            }
            for payload in &self.payloads {
                if !sleep_or_cancel(self.delay_before, token).await {
                    return Ok(());
                }
                sink.send(payload.clone()).await?;
            }
            round += 1;
        }
    }
}
