use tracing::{info, warn};

use crate::{
    adapter::ProtocolAdapter,
    arbitration::ProtocolManager,
    config::DeviceConfig,
    environment::{EnvironmentMonitor, EnvironmentReader},
    pid::{ControlError, PidEngine, PidTunings},
    state::ThermostatState,
    types::{StatusSnapshot, ThermostatMode, ThermostatStatus},
};

/// What one [`ThermostatController::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub commands_applied: usize,
    pub sensor_polled: bool,
    pub pid_sampled: bool,
    /// The periodic send interval elapsed.
    pub broadcast: bool,
}

/// Composition of the protocol manager, sensor monitor and PID engine,
/// driven by an external loop through [`tick`](Self::tick).
pub struct ThermostatController {
    manager: ProtocolManager,
    pid: PidEngine,
    environment: EnvironmentMonitor,
    send_interval_ms: u64,
    last_broadcast_ms: Option<u64>,
}

impl ThermostatController {
    pub fn new(config: &DeviceConfig, reader: Box<dyn EnvironmentReader>) -> Self {
        let state = ThermostatState::with_setpoint(config.setpoint);
        let pid = PidEngine::new(config.pid.clone());
        if let Some(err) = pid.last_error() {
            warn!("PID engine starts disabled: {err}");
        }

        Self {
            manager: ProtocolManager::new(state, config.priority_timeout_ms),
            pid,
            environment: EnvironmentMonitor::new(reader, config.sensor_interval_ms),
            send_interval_ms: config.send_interval_ms,
            last_broadcast_ms: None,
        }
    }

    pub fn register_adapters<I>(&mut self, adapters: I)
    where
        I: IntoIterator<Item = Box<dyn ProtocolAdapter>>,
    {
        self.manager.register_adapters(adapters);
    }

    pub fn manager(&self) -> &ProtocolManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ProtocolManager {
        &mut self.manager
    }

    pub fn state(&self) -> &ThermostatState {
        self.manager.state()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.manager.state().snapshot()
    }

    pub fn pid_tunings(&self) -> PidTunings {
        self.pid.tunings()
    }

    pub fn tune_pid(&mut self, tunings: PidTunings) -> Result<(), ControlError> {
        self.pid.set_tunings(tunings)?;
        info!(
            "PID tuned: kp={} ki={} kd={}",
            tunings.kp, tunings.ki, tunings.kd
        );
        Ok(())
    }

    /// Turns closed-loop control on or off. Disabling holds the valve where
    /// it is instead of closing it.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.manager.set_enabled(enabled);
        info!("thermostat {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn tick(&mut self, now_ms: u64) -> TickReport {
        let commands_applied = self.manager.service_adapters(now_ms);

        let sensor_polled = self.environment.poll(now_ms);
        if sensor_polled {
            self.manager.record_environment(self.environment.environment());
        }

        let state = self.manager.state();
        self.pid
            .set_active(state.is_enabled() && state.mode() != ThermostatMode::Off);
        // The valve only moves on a fresh sample; between samples a manual
        // SET_VALVE stands.
        let pid_sampled = match self.pid.sample(
            state.target_temperature(),
            state.current_temperature(),
            now_ms,
        ) {
            Some(output) => {
                self.manager.record_valve_output(output);
                true
            }
            None => false,
        };

        let broadcast = self.broadcast_due(now_ms);
        if broadcast {
            self.last_broadcast_ms = Some(now_ms);
            let temperature = self.manager.state().current_temperature();
            self.manager.broadcast_temperature(temperature);
        }
        // Every adapter, including one whose SET_VALVE the sample just
        // overrode, sees the stored valve.
        if pid_sampled || broadcast {
            let state = self.manager.state();
            let (valve, heating) = (state.valve_position(), state.is_heating());
            self.manager.broadcast_valve_position(valve);
            self.manager.broadcast_heating_state(heating);
        }

        self.update_status();

        TickReport {
            commands_applied,
            sensor_polled,
            pid_sampled,
            broadcast,
        }
    }

    fn broadcast_due(&self, now_ms: u64) -> bool {
        self.last_broadcast_ms
            .map(|last| now_ms.saturating_sub(last) >= self.send_interval_ms)
            .unwrap_or(true)
    }

    fn update_status(&mut self) {
        let status = if self.environment.error().is_some() {
            ThermostatStatus::SensorError
        } else if self.pid.last_error().is_some() {
            ThermostatStatus::ControlError
        } else {
            ThermostatStatus::Ok
        };

        let previous = self.manager.state().status();
        if status != previous {
            match (status, self.environment.error(), self.pid.last_error()) {
                (ThermostatStatus::SensorError, Some(err), _) => {
                    warn!("{err}; using default room values")
                }
                (ThermostatStatus::ControlError, _, Some(err)) => warn!("{err}"),
                _ => info!("status {} -> {}", previous.as_str(), status.as_str()),
            }
        }
        self.manager.record_status(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::{
            testing::{Recorder, RecordingAdapter},
            Notification,
        },
        command::{Command, CommandSource},
        config::PidConfig,
        environment::{testing::ScriptedReader, Environment, SensorError},
    };
    use pretty_assertions::assert_eq;

    fn test_config() -> DeviceConfig {
        DeviceConfig {
            send_interval_ms: 30_000,
            sensor_interval_ms: 10_000,
            pid: PidConfig {
                kp: 10.0,
                ki: 0.0,
                kd: 0.0,
                sample_interval_ms: 1_000,
                min_output: 0.0,
                max_output: 100.0,
            },
            ..DeviceConfig::default()
        }
    }

    fn reading(temperature: f32) -> Result<Environment, SensorError> {
        Ok(Environment {
            temperature,
            humidity: 40.0,
            pressure: 1000.0,
        })
    }

    fn controller(config: &DeviceConfig) -> (ThermostatController, ScriptedReader, Recorder) {
        let reader = ScriptedReader::default();
        let mut controller = ThermostatController::new(config, Box::new(reader.clone()));
        let (mqtt, log) = RecordingAdapter::new(CommandSource::Mqtt);
        controller.register_adapters([mqtt]);
        (controller, reader, log)
    }

    #[test]
    fn unavailable_sensor_uses_defaults_and_keeps_running() {
        let (mut controller, _reader, _log) = controller(&test_config());

        let report = controller.tick(0);

        assert!(report.sensor_polled);
        let state = controller.state();
        assert_eq!(state.current_temperature(), 21.0);
        assert_eq!(state.current_humidity(), 50.0);
        assert_eq!(state.current_pressure(), 1013.25);
        assert_eq!(state.status(), ThermostatStatus::SensorError);
        // setpoint 21.0 against the 21.0 default: PID still ran, output 0
        assert_eq!(state.valve_position(), 0.0);

        controller
            .manager_mut()
            .submit_command(Command::set_temperature(CommandSource::WebApi, 23.0).unwrap(), 500);
        controller.tick(1_000);
        assert_eq!(controller.state().valve_position(), 20.0);
    }

    #[test]
    fn sensor_recovery_clears_status() {
        let (mut controller, reader, _log) = controller(&test_config());
        controller.tick(0);
        assert_eq!(controller.state().status(), ThermostatStatus::SensorError);

        reader.push(reading(19.0));
        controller.tick(10_000);

        assert_eq!(controller.state().status(), ThermostatStatus::Ok);
        assert_eq!(controller.state().current_temperature(), 19.0);
        assert_eq!(controller.state().valve_position(), 20.0);
    }

    #[test]
    fn sensor_error_takes_precedence_over_control_error() {
        let mut config = test_config();
        config.pid.sample_interval_ms = 0;
        let (mut controller, reader, _log) = controller(&config);

        controller.tick(0);
        assert_eq!(controller.state().status(), ThermostatStatus::SensorError);

        reader.push(reading(20.0));
        controller.tick(10_000);
        assert_eq!(controller.state().status(), ThermostatStatus::ControlError);
    }

    #[test]
    fn broadcasts_on_send_interval() {
        let mut config = test_config();
        config.pid.sample_interval_ms = 60_000;
        let (mut controller, reader, log) = controller(&config);
        reader.push(reading(18.0));

        let report = controller.tick(0);
        assert!(report.broadcast);
        assert!(report.pid_sampled);
        assert_eq!(
            log.notifications(),
            vec![
                Notification::Temperature(18.0),
                Notification::ValvePosition(30.0),
                Notification::HeatingState(true),
            ]
        );
        log.clear();

        assert!(!controller.tick(29_999).broadcast);
        assert!(log.notifications().is_empty());

        let report = controller.tick(30_000);
        assert!(report.broadcast);
        assert!(!report.pid_sampled);
        assert_eq!(log.notifications().len(), 3);
    }

    #[test]
    fn pid_sample_overriding_a_valve_command_reaches_its_sender() {
        let (mut controller, reader, log) = controller(&test_config());
        reader.push(reading(18.0));
        controller.tick(0);
        log.clear();

        let manual = Command::set_valve(CommandSource::Mqtt, 80.0).unwrap();
        log.queue(manual);
        let report = controller.tick(1_000);

        assert_eq!(report.commands_applied, 1);
        assert!(report.pid_sampled);
        assert!(!report.broadcast);
        assert_eq!(controller.state().valve_position(), 30.0);
        assert_eq!(log.outcomes(), vec![(manual, true)]);
        assert_eq!(
            log.notifications(),
            vec![
                Notification::ValvePosition(30.0),
                Notification::HeatingState(true),
            ]
        );
    }

    #[test]
    fn disabled_control_holds_valve() {
        let (mut controller, reader, _log) = controller(&test_config());
        reader.push(reading(18.0));
        controller.tick(0);
        assert_eq!(controller.state().valve_position(), 30.0);

        controller.set_enabled(false);
        reader.push(reading(25.0));
        controller.tick(10_000);

        assert_eq!(controller.state().current_temperature(), 25.0);
        assert_eq!(controller.state().valve_position(), 30.0);
    }

    #[test]
    fn manual_valve_stands_while_control_is_off() {
        let (mut controller, reader, log) = controller(&test_config());
        reader.push(reading(18.0));
        controller.tick(0);
        controller.set_enabled(false);

        let manual = Command::set_valve(CommandSource::Mqtt, 55.0).unwrap();
        log.queue(manual);
        controller.tick(100);
        controller.tick(5_000);

        assert_eq!(controller.state().valve_position(), 55.0);
        assert_eq!(log.outcomes(), vec![(manual, true)]);
    }

    #[test]
    fn off_mode_holds_valve_like_disabled() {
        let (mut controller, reader, log) = controller(&test_config());
        reader.push(reading(18.0));
        controller.tick(0);

        log.queue(Command::set_mode(CommandSource::Mqtt, ThermostatMode::Off));
        reader.push(reading(25.0));
        let report = controller.tick(10_000);

        assert_eq!(report.commands_applied, 1);
        assert_eq!(controller.state().mode(), ThermostatMode::Off);
        assert_eq!(controller.state().valve_position(), 30.0);
    }

    #[test]
    fn live_tuning_changes_output() {
        let (mut controller, reader, _log) = controller(&test_config());
        reader.push(reading(20.0));
        controller.tick(0);
        assert_eq!(controller.state().valve_position(), 10.0);

        controller
            .tune_pid(PidTunings {
                kp: 40.0,
                ki: 0.0,
                kd: 0.0,
            })
            .unwrap();
        controller.tick(1_000);
        assert_eq!(controller.state().valve_position(), 40.0);
        assert_eq!(controller.pid_tunings().kp, 40.0);
    }
}
