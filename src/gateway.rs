// Part of fanctl. Copyright 2025-2026 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! The operator-facing command path: speed in, voltage out, always logged.

use log::*;
use std::sync::Arc;

use crate::convert::{clamp_speed, speed_to_voltage};
use crate::link::FieldBusLink;
use crate::logfile::CommandLog;
use crate::types::Error;

/// What a command produced, in the three strings the UI shows.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub speed_text: String,
    pub voltage_text: String,
    pub link_status: String,
    pub delivered: bool,
}

pub struct CommandGateway {
    link: Arc<FieldBusLink>,
    log: CommandLog,
}

impl CommandGateway {
    pub fn new(link: Arc<FieldBusLink>, log: CommandLog) -> Self {
        Self { link, log }
    }

    /// Apply a requested speed: compute the voltage, try to deliver it,
    /// log the intent regardless of the delivery outcome.
    pub fn apply_speed(&self, speed_kmh: f64) -> Outcome {
        self.dispatch(speed_kmh, false)
    }

    /// Stop the fan; same path as `apply_speed(0.0)` with its own phrasing.
    pub fn stop(&self) -> Outcome {
        self.dispatch(0.0, true)
    }

    fn dispatch(&self, speed_kmh: f64, stop: bool) -> Outcome {
        let speed_kmh = clamp_speed(speed_kmh);
        let voltage = speed_to_voltage(speed_kmh);

        let delivered = match self.link.write_voltage(voltage) {
            Ok(()) => true,
            Err(Error::NotReady) => {
                debug!("command logged but not delivered, link not ready");
                false
            }
            Err(e) => {
                warn!("delivery failed: {}", e);
                false
            }
        };

        // Delivery failure never blocks the audit record.
        if let Err(e) = self.log.append(speed_kmh, voltage) {
            warn!("could not append to command log: {}", e);
        }

        let speed_text = if stop {
            "Fan stopped (0.00 km/h)".into()
        } else {
            format!("Speed set: {:.2} km/h", speed_kmh)
        };
        let mut voltage_text = format!("Voltage sent: {:.2} V", voltage);
        if !delivered {
            voltage_text.push_str(" (delivery failed)");
        }

        Outcome {
            speed_text,
            voltage_text,
            link_status: self.link.status(),
            delivered,
        }
    }
}
