use crate::{
    command::{Command, CommandSource},
    types::ThermostatMode,
};

/// One outbound state notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notification {
    Temperature(f32),
    Setpoint(f32),
    ValvePosition(f32),
    Mode(ThermostatMode),
    HeatingState(bool),
}

/// Capability set every protocol bridge (KNX, MQTT, web) offers the
/// protocol manager.
///
/// `receive_commands` is the only inbound path. It is called once per control
/// tick and must not block: transports buffer whatever arrived since the last
/// tick and hand it over here.
pub trait ProtocolAdapter: Send {
    /// Commands yielded by this adapter are tagged with this source, and
    /// fan-out skips the adapter whose source matches the command's.
    fn source(&self) -> CommandSource;

    fn receive_commands(&mut self, now_ms: u64) -> Vec<Command>;

    /// Arbitration result for a command this adapter yielded, in the order
    /// the commands were yielded.
    fn command_outcome(&mut self, _command: &Command, _accepted: bool) {}

    fn send_temperature(&mut self, celsius: f32);
    fn send_setpoint(&mut self, celsius: f32);
    fn send_valve_position(&mut self, percent: f32);
    fn send_mode(&mut self, mode: ThermostatMode);
    fn send_heating_state(&mut self, heating: bool);

    fn notify(&mut self, notification: Notification) {
        match notification {
            Notification::Temperature(value) => self.send_temperature(value),
            Notification::Setpoint(value) => self.send_setpoint(value),
            Notification::ValvePosition(value) => self.send_valve_position(value),
            Notification::Mode(mode) => self.send_mode(mode),
            Notification::HeatingState(heating) => self.send_heating_state(heating),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use super::*;

    /// Shared handle onto what a [`RecordingAdapter`] saw, kept by the test
    /// after the adapter itself is boxed into the manager.
    #[derive(Debug, Clone, Default)]
    pub struct Recorder {
        pub notifications: Arc<Mutex<Vec<Notification>>>,
        pub outcomes: Arc<Mutex<Vec<(Command, bool)>>>,
        pub inbox: Arc<Mutex<VecDeque<Command>>>,
    }

    impl Recorder {
        pub fn notifications(&self) -> Vec<Notification> {
            self.notifications.lock().unwrap().clone()
        }

        pub fn outcomes(&self) -> Vec<(Command, bool)> {
            self.outcomes.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.notifications.lock().unwrap().clear();
        }

        pub fn queue(&self, command: Command) {
            self.inbox.lock().unwrap().push_back(command);
        }
    }

    pub struct RecordingAdapter {
        source: CommandSource,
        recorder: Recorder,
    }

    impl RecordingAdapter {
        pub fn new(source: CommandSource) -> (Box<dyn ProtocolAdapter>, Recorder) {
            let recorder = Recorder::default();
            let adapter = Self {
                source,
                recorder: recorder.clone(),
            };
            (Box::new(adapter), recorder)
        }

        fn record(&self, notification: Notification) {
            self.recorder.notifications.lock().unwrap().push(notification);
        }
    }

    impl ProtocolAdapter for RecordingAdapter {
        fn source(&self) -> CommandSource {
            self.source
        }

        fn receive_commands(&mut self, _now_ms: u64) -> Vec<Command> {
            self.recorder.inbox.lock().unwrap().drain(..).collect()
        }

        fn command_outcome(&mut self, command: &Command, accepted: bool) {
            self.recorder.outcomes.lock().unwrap().push((*command, accepted));
        }

        fn send_temperature(&mut self, celsius: f32) {
            self.record(Notification::Temperature(celsius));
        }

        fn send_setpoint(&mut self, celsius: f32) {
            self.record(Notification::Setpoint(celsius));
        }

        fn send_valve_position(&mut self, percent: f32) {
            self.record(Notification::ValvePosition(percent));
        }

        fn send_mode(&mut self, mode: ThermostatMode) {
            self.record(Notification::Mode(mode));
        }

        fn send_heating_state(&mut self, heating: bool) {
            self.record(Notification::HeatingState(heating));
        }
    }
}
