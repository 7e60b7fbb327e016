use knx_thermostat_common::{Environment, EnvironmentReader, SensorError};

/// Stand-in for the BME280 on host builds: slowly wandering room values.
#[derive(Debug, Default)]
pub struct SimulatedEnvironment {
    tick: u64,
}

impl EnvironmentReader for SimulatedEnvironment {
    fn read_environment(&mut self) -> Result<Environment, SensorError> {
        self.tick = self.tick.saturating_add(1);

        // Hardware integration point: the BME280 driver replaces this.
        Ok(Environment {
            temperature: 20.0 + ((self.tick % 8) as f32 * 0.2),
            humidity: 42.0 + ((self.tick % 6) as f32 * 0.5),
            pressure: 1008.0 + ((self.tick % 4) as f32 * 0.75),
        })
    }
}

/// A sensor that was not found at boot.
#[derive(Debug, Default)]
pub struct AbsentSensor;

impl EnvironmentReader for AbsentSensor {
    fn read_environment(&mut self) -> Result<Environment, SensorError> {
        Err(SensorError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_readings_pass_validation() {
        let mut sensor = SimulatedEnvironment::default();
        for _ in 0..24 {
            let reading = sensor.read_environment().unwrap();
            assert!(reading.validate().is_ok());
        }
    }

    #[test]
    fn absent_sensor_is_unavailable() {
        assert_eq!(
            AbsentSensor.read_environment(),
            Err(SensorError::Unavailable)
        );
    }
}
