use crate::command::{Command, CommandError, CommandKind, CommandSource};

pub const TOPIC_TEMPERATURE: &str = "temperature";
pub const TOPIC_SETPOINT: &str = "setpoint";
pub const TOPIC_VALVE: &str = "valve";
pub const TOPIC_MODE: &str = "mode";
pub const TOPIC_HEATING: &str = "heating";
pub const TOPIC_STATUS: &str = "status";
pub const TOPIC_COMMAND_SEGMENT: &str = "set";
pub const DEFAULT_TOPIC_PREFIX: &str = "thermostat";

/// MQTT topic layout under a configurable prefix.
///
/// State is published to `<prefix>/<name>`, commands arrive on
/// `<prefix>/set/<temperature|mode|valve>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttTopics {
    prefix: String,
}

impl MqttTopics {
    /// Surrounding slashes are dropped; a blank prefix falls back to
    /// [`DEFAULT_TOPIC_PREFIX`] so no topic ever starts with `/`.
    pub fn new(prefix: &str) -> Self {
        let prefix = prefix.trim().trim_matches('/');
        let prefix = if prefix.is_empty() {
            DEFAULT_TOPIC_PREFIX
        } else {
            prefix
        };
        Self {
            prefix: prefix.to_string(),
        }
    }

    pub fn state(&self, name: &str) -> String {
        format!("{}/{name}", self.prefix)
    }

    pub fn temperature(&self) -> String {
        self.state(TOPIC_TEMPERATURE)
    }

    pub fn setpoint(&self) -> String {
        self.state(TOPIC_SETPOINT)
    }

    pub fn valve(&self) -> String {
        self.state(TOPIC_VALVE)
    }

    pub fn mode(&self) -> String {
        self.state(TOPIC_MODE)
    }

    pub fn heating(&self) -> String {
        self.state(TOPIC_HEATING)
    }

    /// Availability topic carrying `online`/`offline`.
    pub fn status(&self) -> String {
        self.state(TOPIC_STATUS)
    }

    pub fn command_filter(&self) -> String {
        format!("{}/{TOPIC_COMMAND_SEGMENT}/+", self.prefix)
    }

    /// `None` when the topic is not one of ours.
    pub fn parse_command(&self, topic: &str, payload: &str) -> Option<Result<Command, CommandError>> {
        let suffix = topic
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('/')?
            .strip_prefix(TOPIC_COMMAND_SEGMENT)?
            .strip_prefix('/')?;

        Some(
            CommandKind::from_name(suffix)
                .and_then(|kind| Command::parse(CommandSource::Mqtt, kind, payload)),
        )
    }
}
