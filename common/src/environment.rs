use serde::Serialize;
use thiserror::Error;

use crate::state::{DEFAULT_HUMIDITY_PCT, DEFAULT_PRESSURE_HPA, DEFAULT_TEMPERATURE_C};

const TEMPERATURE_RANGE_C: (f32, f32) = (-40.0, 85.0);
const HUMIDITY_RANGE_PCT: (f32, f32) = (0.0, 100.0);
const PRESSURE_RANGE_HPA: (f32, f32) = (300.0, 1100.0);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Environment {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
}

impl Environment {
    /// Room values substituted while the sensor is unavailable.
    pub const FALLBACK: Environment = Environment {
        temperature: DEFAULT_TEMPERATURE_C,
        humidity: DEFAULT_HUMIDITY_PCT,
        pressure: DEFAULT_PRESSURE_HPA,
    };

    pub fn validate(self) -> Result<Self, SensorError> {
        check("temperature", self.temperature, TEMPERATURE_RANGE_C)?;
        check("humidity", self.humidity, HUMIDITY_RANGE_PCT)?;
        check("pressure", self.pressure, PRESSURE_RANGE_HPA)?;
        Ok(self)
    }
}

fn check(what: &'static str, value: f32, (min, max): (f32, f32)) -> Result<(), SensorError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SensorError::InvalidReading { what, value })
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    #[error("environment sensor unavailable")]
    Unavailable,
    #[error("invalid {what} reading: {value}")]
    InvalidReading { what: &'static str, value: f32 },
}

/// Temperature/humidity/pressure source.
pub trait EnvironmentReader: Send {
    fn read_environment(&mut self) -> Result<Environment, SensorError>;
}

/// Polls a reader on a fixed interval and always has a usable reading:
/// the last valid one, or [`Environment::FALLBACK`] while the sensor fails.
pub struct EnvironmentMonitor {
    reader: Box<dyn EnvironmentReader>,
    interval_ms: u64,
    last_poll_ms: Option<u64>,
    current: Environment,
    error: Option<SensorError>,
}

impl EnvironmentMonitor {
    pub fn new(reader: Box<dyn EnvironmentReader>, interval_ms: u64) -> Self {
        Self {
            reader,
            interval_ms,
            last_poll_ms: None,
            current: Environment::FALLBACK,
            error: None,
        }
    }

    /// Reads the sensor if the poll interval elapsed. Returns whether a read
    /// was attempted.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if let Some(last) = self.last_poll_ms {
            if now_ms.saturating_sub(last) < self.interval_ms {
                return false;
            }
        }
        self.last_poll_ms = Some(now_ms);

        match self.reader.read_environment().and_then(Environment::validate) {
            Ok(environment) => {
                self.current = environment;
                self.error = None;
            }
            Err(err) => {
                self.current = Environment::FALLBACK;
                self.error = Some(err);
            }
        }
        true
    }

    pub fn environment(&self) -> Environment {
        self.current
    }

    pub fn error(&self) -> Option<&SensorError> {
        self.error.as_ref()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedReader;
    use super::*;
    use pretty_assertions::assert_eq;

    fn reading(temperature: f32) -> Environment {
        Environment {
            temperature,
            humidity: 45.0,
            pressure: 990.0,
        }
    }

    #[test]
    fn polls_only_when_interval_elapsed() {
        let reader = ScriptedReader::default();
        reader.push(Ok(reading(19.0)));
        reader.push(Ok(reading(19.5)));
        let mut monitor = EnvironmentMonitor::new(Box::new(reader), 10_000);

        assert!(monitor.poll(0));
        assert_eq!(monitor.environment().temperature, 19.0);
        assert!(!monitor.poll(9_999));
        assert!(monitor.poll(10_000));
        assert_eq!(monitor.environment().temperature, 19.5);
    }

    #[test]
    fn unavailable_sensor_falls_back_to_defaults() {
        let reader = ScriptedReader::default();
        reader.push(Ok(reading(18.0)));
        let mut monitor = EnvironmentMonitor::new(Box::new(reader), 1);

        monitor.poll(0);
        assert!(monitor.error().is_none());

        monitor.poll(5);
        assert_eq!(monitor.environment(), Environment::FALLBACK);
        assert_eq!(monitor.error(), Some(&SensorError::Unavailable));
    }

    #[test]
    fn implausible_readings_are_rejected() {
        let reader = ScriptedReader::default();
        reader.push(Ok(Environment {
            temperature: 21.0,
            humidity: 140.0,
            pressure: 1000.0,
        }));
        let mut monitor = EnvironmentMonitor::new(Box::new(reader), 1);

        monitor.poll(0);
        assert_eq!(monitor.environment(), Environment::FALLBACK);
        assert_eq!(
            monitor.error(),
            Some(&SensorError::InvalidReading {
                what: "humidity",
                value: 140.0
            })
        );
    }
}
