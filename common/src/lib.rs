pub mod adapter;
pub mod arbitration;
pub mod command;
pub mod config;
pub mod environment;
pub mod knx;
pub mod pid;
pub mod state;
pub mod thermostat;
pub mod topics;
pub mod types;

pub use adapter::{Notification, ProtocolAdapter};
pub use arbitration::{ArbitrationRecord, ProtocolManager, DEFAULT_PRIORITY_TIMEOUT_MS};
pub use command::{Command, CommandError, CommandKind, CommandSource};
pub use config::{ConfigError, DeviceConfig, KnxConfig, KnxGroups, MqttConfig, PidConfig, WebConfig};
pub use environment::{Environment, EnvironmentMonitor, EnvironmentReader, SensorError};
pub use knx::{GroupAddress, GroupTelegram, KnxAdapter, KnxBus, KnxError, PhysicalAddress};
pub use pid::{ControlError, PidEngine, PidTunings};
pub use state::ThermostatState;
pub use thermostat::{ThermostatController, TickReport};
pub use topics::{MqttTopics, DEFAULT_TOPIC_PREFIX};
pub use types::{StatusSnapshot, ThermostatMode, ThermostatStatus};
