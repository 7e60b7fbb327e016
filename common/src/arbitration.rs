//! Multi-protocol command arbitration.
//!
//! The [`ProtocolManager`] owns the one [`ThermostatState`]. Every command from
//! KNX, MQTT or the web API goes through [`ProtocolManager::submit_command`],
//! which decides whether the source may act right now, applies the change and
//! pushes the new value to every adapter except the one that sent it.
//!
//! Priority: `Knx < Mqtt < WebApi < Internal`, lower wins. After a command is
//! applied, only sources of equal or higher priority may act until
//! `priority_timeout_ms` has passed; after that anyone may.

use tracing::debug;

use crate::{
    adapter::{Notification, ProtocolAdapter},
    command::{Command, CommandKind, CommandSource},
    environment::Environment,
    state::ThermostatState,
    types::{ThermostatMode, ThermostatStatus},
};

pub const DEFAULT_PRIORITY_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbitrationRecord {
    pub last_source: CommandSource,
    pub last_command_ms: u64,
}

impl Default for ArbitrationRecord {
    fn default() -> Self {
        Self {
            last_source: CommandSource::Internal,
            last_command_ms: 0,
        }
    }
}

pub struct ProtocolManager {
    state: ThermostatState,
    record: ArbitrationRecord,
    priority_timeout_ms: u64,
    adapters: Vec<Box<dyn ProtocolAdapter>>,
}

impl ProtocolManager {
    pub fn new(state: ThermostatState, priority_timeout_ms: u64) -> Self {
        Self {
            state,
            record: ArbitrationRecord::default(),
            priority_timeout_ms,
            adapters: Vec::new(),
        }
    }

    pub fn register_adapters<I>(&mut self, adapters: I)
    where
        I: IntoIterator<Item = Box<dyn ProtocolAdapter>>,
    {
        for adapter in adapters {
            self.register_adapter(adapter);
        }
    }

    pub fn register_adapter(&mut self, adapter: Box<dyn ProtocolAdapter>) {
        debug!("registered {} adapter", adapter.source().as_str());
        self.adapters.push(adapter);
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    pub fn state(&self) -> &ThermostatState {
        &self.state
    }

    pub fn record(&self) -> ArbitrationRecord {
        self.record
    }

    /// Whether `source` may act at `now_ms`.
    pub fn has_priority(&self, source: CommandSource, now_ms: u64) -> bool {
        let elapsed = now_ms.saturating_sub(self.record.last_command_ms);
        elapsed > self.priority_timeout_ms || source <= self.record.last_source
    }

    /// Applies `command` if its source currently has priority.
    ///
    /// Returns `false` when the command lost arbitration or could not be
    /// applied; the state is unchanged in both cases. A command carrying the
    /// value already in the state is still applied and fanned out.
    pub fn submit_command(&mut self, command: Command, now_ms: u64) -> bool {
        if !self.has_priority(command.source, now_ms) {
            debug!(
                "{} {} rejected: {} holds priority",
                command.source.as_str(),
                command.kind.as_str(),
                self.record.last_source.as_str()
            );
            return false;
        }

        let Some(notification) = self.apply(&command) else {
            debug!(
                "{} {} with value {} not applicable",
                command.source.as_str(),
                command.kind.as_str(),
                command.value
            );
            return false;
        };

        self.record = ArbitrationRecord {
            last_source: command.source,
            last_command_ms: now_ms,
        };
        self.fan_out(notification, Some(command.source));
        true
    }

    /// Drains every adapter's inbound queue and submits what it yields,
    /// reporting each outcome back to the adapter. Returns how many commands
    /// were applied.
    pub fn service_adapters(&mut self, now_ms: u64) -> usize {
        let mut applied = 0;
        for index in 0..self.adapters.len() {
            let commands = self.adapters[index].receive_commands(now_ms);
            for command in commands {
                let accepted = self.submit_command(command, now_ms);
                self.adapters[index].command_outcome(&command, accepted);
                if accepted {
                    applied += 1;
                }
            }
        }
        applied
    }

    pub fn broadcast_temperature(&mut self, celsius: f32) {
        self.fan_out(Notification::Temperature(celsius), None);
    }

    pub fn broadcast_setpoint(&mut self, celsius: f32) {
        self.fan_out(Notification::Setpoint(celsius), None);
    }

    pub fn broadcast_valve_position(&mut self, percent: f32) {
        self.fan_out(Notification::ValvePosition(percent), None);
    }

    pub fn broadcast_mode(&mut self, mode: ThermostatMode) {
        self.fan_out(Notification::Mode(mode), None);
    }

    pub fn broadcast_heating_state(&mut self, heating: bool) {
        self.fan_out(Notification::HeatingState(heating), None);
    }

    // Local writers: sensor readings, PID output, status and the enable flag
    // do not compete for priority and never touch the arbitration record.

    pub(crate) fn record_environment(&mut self, environment: Environment) {
        self.state.set_current_temperature(environment.temperature);
        self.state.set_current_humidity(environment.humidity);
        self.state.set_current_pressure(environment.pressure);
    }

    pub(crate) fn record_valve_output(&mut self, percent: f32) {
        self.state.set_valve_position(percent);
    }

    pub(crate) fn record_status(&mut self, status: ThermostatStatus) {
        self.state.set_status(status);
    }

    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.state.set_enabled(enabled);
    }

    fn apply(&mut self, command: &Command) -> Option<Notification> {
        if !command.value.is_finite() {
            return None;
        }

        match command.kind {
            CommandKind::SetTemperature => {
                self.state.set_target_temperature(command.value);
                Some(Notification::Setpoint(self.state.target_temperature()))
            }
            CommandKind::SetMode => {
                let mode = ThermostatMode::from_value(command.value)?;
                self.state.set_mode(mode);
                Some(Notification::Mode(mode))
            }
            CommandKind::SetValve => {
                self.state.set_valve_position(command.value);
                Some(Notification::ValvePosition(self.state.valve_position()))
            }
        }
    }

    fn fan_out(&mut self, notification: Notification, exclude: Option<CommandSource>) {
        for adapter in &mut self.adapters {
            if Some(adapter.source()) == exclude {
                continue;
            }
            adapter.notify(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::testing::{Recorder, RecordingAdapter};
    use pretty_assertions::assert_eq;

    const TIMEOUT: u64 = DEFAULT_PRIORITY_TIMEOUT_MS;

    fn manager_with_all_adapters() -> (ProtocolManager, Recorder, Recorder, Recorder) {
        let mut manager = ProtocolManager::new(ThermostatState::default(), TIMEOUT);
        let (knx, knx_log) = RecordingAdapter::new(CommandSource::Knx);
        let (mqtt, mqtt_log) = RecordingAdapter::new(CommandSource::Mqtt);
        let (web, web_log) = RecordingAdapter::new(CommandSource::WebApi);
        manager.register_adapters([knx, mqtt, web]);
        (manager, knx_log, mqtt_log, web_log)
    }

    fn setpoint(source: CommandSource, value: f32) -> Command {
        Command::set_temperature(source, value).unwrap()
    }

    #[test]
    fn accepted_command_skips_originating_adapter() {
        let (mut manager, knx, mqtt, web) = manager_with_all_adapters();

        assert!(manager.submit_command(setpoint(CommandSource::Knx, 21.5), 1_000));

        assert_eq!(manager.state().target_temperature(), 21.5);
        assert!(knx.notifications().is_empty());
        assert_eq!(mqtt.notifications(), vec![Notification::Setpoint(21.5)]);
        assert_eq!(web.notifications(), vec![Notification::Setpoint(21.5)]);
    }

    #[test]
    fn internal_commands_reach_every_adapter() {
        let (mut manager, knx, mqtt, web) = manager_with_all_adapters();

        assert!(manager.submit_command(
            Command::set_mode(CommandSource::Internal, ThermostatMode::Boost),
            10
        ));

        for log in [knx, mqtt, web] {
            assert_eq!(log.notifications(), vec![Notification::Mode(ThermostatMode::Boost)]);
        }
    }

    #[test]
    fn lower_priority_source_is_rejected_inside_window() {
        let (mut manager, _knx, mqtt, _web) = manager_with_all_adapters();

        assert!(manager.submit_command(setpoint(CommandSource::Knx, 22.0), 5_000));
        assert!(!manager.submit_command(setpoint(CommandSource::Mqtt, 18.0), 5_000 + TIMEOUT));
        assert!(!manager.submit_command(setpoint(CommandSource::WebApi, 18.0), 6_000));

        assert_eq!(manager.state().target_temperature(), 22.0);
        assert_eq!(manager.record().last_source, CommandSource::Knx);
        assert_eq!(mqtt.notifications(), vec![Notification::Setpoint(22.0)]);
    }

    #[test]
    fn any_source_wins_after_timeout() {
        let (mut manager, ..) = manager_with_all_adapters();

        assert!(manager.submit_command(setpoint(CommandSource::Knx, 22.0), 5_000));
        assert!(manager.submit_command(setpoint(CommandSource::WebApi, 19.0), 5_001 + TIMEOUT));

        assert_eq!(manager.state().target_temperature(), 19.0);
        assert_eq!(
            manager.record(),
            ArbitrationRecord {
                last_source: CommandSource::WebApi,
                last_command_ms: 5_001 + TIMEOUT,
            }
        );
    }

    #[test]
    fn same_source_always_succeeds_and_extends_window() {
        let (mut manager, ..) = manager_with_all_adapters();

        assert!(manager.submit_command(setpoint(CommandSource::WebApi, 20.0), 100));
        assert!(manager.submit_command(setpoint(CommandSource::WebApi, 20.5), 200));
        assert_eq!(manager.record().last_command_ms, 200);
    }

    #[test]
    fn identical_values_are_reapplied_and_fanned_out() {
        let (mut manager, knx, ..) = manager_with_all_adapters();

        assert!(manager.submit_command(setpoint(CommandSource::Mqtt, 21.0), 100));
        assert!(manager.submit_command(setpoint(CommandSource::Mqtt, 21.0), 200));

        assert_eq!(
            knx.notifications(),
            vec![Notification::Setpoint(21.0), Notification::Setpoint(21.0)]
        );
        assert_eq!(manager.record().last_command_ms, 200);
    }

    #[test]
    fn unmappable_mode_is_refused_without_side_effects() {
        let (mut manager, knx, ..) = manager_with_all_adapters();
        let bogus = Command {
            source: CommandSource::Knx,
            kind: CommandKind::SetMode,
            value: 9.0,
        };

        assert!(!manager.submit_command(bogus, 100));
        assert_eq!(manager.state().mode(), ThermostatMode::Comfort);
        assert_eq!(manager.record(), ArbitrationRecord::default());
        assert!(knx.notifications().is_empty());
    }

    #[test]
    fn broadcast_does_not_dedup_or_touch_record() {
        let (mut manager, knx, mqtt, web) = manager_with_all_adapters();
        assert!(manager.submit_command(setpoint(CommandSource::Mqtt, 21.0), 100));
        for log in [&knx, &mqtt, &web] {
            log.clear();
        }

        manager.broadcast_temperature(20.25);
        manager.broadcast_temperature(20.25);

        for log in [knx, mqtt, web] {
            assert_eq!(
                log.notifications(),
                vec![Notification::Temperature(20.25), Notification::Temperature(20.25)]
            );
        }
        assert_eq!(
            manager.record(),
            ArbitrationRecord {
                last_source: CommandSource::Mqtt,
                last_command_ms: 100,
            }
        );
    }

    #[test]
    fn valve_commands_are_clamped_before_fan_out() {
        let (mut manager, _knx, mqtt, _web) = manager_with_all_adapters();
        let command = Command {
            source: CommandSource::Knx,
            kind: CommandKind::SetValve,
            value: 130.0,
        };

        assert!(manager.submit_command(command, 1));
        assert_eq!(manager.state().valve_position(), 100.0);
        assert_eq!(mqtt.notifications(), vec![Notification::ValvePosition(100.0)]);
    }

    #[test]
    fn empty_adapter_set_is_valid() {
        let mut manager = ProtocolManager::new(ThermostatState::default(), TIMEOUT);

        assert!(manager.submit_command(setpoint(CommandSource::WebApi, 23.0), 0));
        manager.broadcast_valve_position(40.0);
        assert_eq!(manager.service_adapters(10), 0);
        assert_eq!(manager.state().target_temperature(), 23.0);
    }

    #[test]
    fn mqtt_mode_then_knx_setpoint_then_mqtt_retry() {
        let (mut manager, knx, mqtt, web) = manager_with_all_adapters();

        assert!(manager.submit_command(
            Command::set_mode(CommandSource::Mqtt, ThermostatMode::Eco),
            0
        ));
        assert!(manager.submit_command(setpoint(CommandSource::Knx, 22.0), 1_000));
        assert_eq!(mqtt.notifications(), vec![Notification::Setpoint(22.0)]);
        assert_eq!(
            web.notifications(),
            vec![
                Notification::Mode(ThermostatMode::Eco),
                Notification::Setpoint(22.0)
            ]
        );
        assert_eq!(knx.notifications(), vec![Notification::Mode(ThermostatMode::Eco)]);

        let retry = Command::set_mode(CommandSource::Mqtt, ThermostatMode::Comfort);
        assert!(!manager.submit_command(retry, 2_000));
        assert!(!manager.submit_command(retry, 1_000 + TIMEOUT));
        assert_eq!(manager.state().mode(), ThermostatMode::Eco);
        assert_eq!(manager.state().target_temperature(), 22.0);

        assert!(manager.submit_command(retry, 1_001 + TIMEOUT));
        assert_eq!(manager.state().mode(), ThermostatMode::Comfort);
    }

    #[test]
    fn service_reports_outcomes_to_originating_adapter() {
        let (mut manager, knx, mqtt, _web) = manager_with_all_adapters();
        knx.queue(setpoint(CommandSource::Knx, 22.0));
        mqtt.queue(setpoint(CommandSource::Mqtt, 18.0));

        assert_eq!(manager.service_adapters(500), 1);

        assert_eq!(knx.outcomes(), vec![(setpoint(CommandSource::Knx, 22.0), true)]);
        assert_eq!(mqtt.outcomes(), vec![(setpoint(CommandSource::Mqtt, 18.0), false)]);
        assert_eq!(manager.state().target_temperature(), 22.0);
    }

    #[test]
    fn local_writes_leave_record_alone() {
        let (mut manager, knx, ..) = manager_with_all_adapters();

        manager.record_valve_output(250.0);
        manager.record_status(ThermostatStatus::SensorError);
        manager.set_enabled(false);

        assert_eq!(manager.state().valve_position(), 100.0);
        assert_eq!(manager.state().status(), ThermostatStatus::SensorError);
        assert!(!manager.state().is_enabled());
        assert_eq!(manager.record(), ArbitrationRecord::default());
        assert!(knx.notifications().is_empty());
    }
}
