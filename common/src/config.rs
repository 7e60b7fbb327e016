use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    arbitration::DEFAULT_PRIORITY_TIMEOUT_MS,
    knx::{GroupAddress, PhysicalAddress},
    pid::PidTunings,
    state::{DEFAULT_TEMPERATURE_C, MAX_SETPOINT_C, MIN_SETPOINT_C},
    topics::DEFAULT_TOPIC_PREFIX,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid KNX physical address '{0}' (expected area.line.device)")]
    PhysicalAddress(String),
    #[error("invalid KNX group address '{0}' (expected main/middle/sub)")]
    GroupAddress(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub sample_interval_ms: u64,
    pub min_output: f32,
    pub max_output: f32,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 10.0,
            ki: 0.05,
            kd: 1.0,
            sample_interval_ms: 10_000,
            min_output: 0.0,
            max_output: 100.0,
        }
    }
}

impl PidConfig {
    pub fn tunings(&self) -> PidTunings {
        PidTunings {
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
        }
    }
}

/// Group addresses the thermostat listens on (`*_command`) and writes to
/// (`*_state`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnxGroups {
    pub setpoint_command: GroupAddress,
    pub mode_command: GroupAddress,
    pub valve_command: GroupAddress,
    pub temperature_state: GroupAddress,
    pub setpoint_state: GroupAddress,
    pub valve_state: GroupAddress,
    pub mode_state: GroupAddress,
    pub heating_state: GroupAddress,
}

impl Default for KnxGroups {
    fn default() -> Self {
        Self {
            setpoint_command: GroupAddress::new(1, 0, 1),
            mode_command: GroupAddress::new(1, 0, 2),
            valve_command: GroupAddress::new(1, 0, 3),
            temperature_state: GroupAddress::new(1, 1, 0),
            setpoint_state: GroupAddress::new(1, 1, 1),
            mode_state: GroupAddress::new(1, 1, 2),
            valve_state: GroupAddress::new(1, 1, 3),
            heating_state: GroupAddress::new(1, 1, 4),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnxConfig {
    pub enabled: bool,
    pub physical_address: PhysicalAddress,
    pub groups: KnxGroups,
}

impl Default for KnxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            physical_address: PhysicalAddress::new(1, 1, 100),
            groups: KnxGroups::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub topic_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server: "192.168.1.100".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: "knx-thermostat".to_string(),
            topic_prefix: DEFAULT_TOPIC_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            username: "admin".to_string(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device_name: String,
    pub send_interval_ms: u64,
    pub sensor_interval_ms: u64,
    pub loop_interval_ms: u64,
    pub priority_timeout_ms: u64,
    pub setpoint: f32,
    pub knx: KnxConfig,
    pub mqtt: MqttConfig,
    pub pid: PidConfig,
    pub web: WebConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_name: "KNX Thermostat".to_string(),
            send_interval_ms: 30_000,
            sensor_interval_ms: 10_000,
            loop_interval_ms: 100,
            priority_timeout_ms: DEFAULT_PRIORITY_TIMEOUT_MS,
            setpoint: DEFAULT_TEMPERATURE_C,
            knx: KnxConfig::default(),
            mqtt: MqttConfig::default(),
            pid: PidConfig::default(),
            web: WebConfig::default(),
        }
    }
}

impl DeviceConfig {
    /// Pulls values that would break the control loop back into range.
    /// PID gains are left alone: a bad gain shows up as a control error
    /// rather than being silently rewritten.
    pub fn sanitize(&mut self) {
        if self.device_name.trim().is_empty() {
            self.device_name = Self::default().device_name;
        }
        self.send_interval_ms = self.send_interval_ms.max(1_000);
        self.sensor_interval_ms = self.sensor_interval_ms.max(1_000);
        self.loop_interval_ms = self.loop_interval_ms.clamp(10, 1_000);

        self.setpoint = if self.setpoint.is_finite() {
            self.setpoint.clamp(MIN_SETPOINT_C, MAX_SETPOINT_C)
        } else {
            DEFAULT_TEMPERATURE_C
        };

        if self.mqtt.port == 0 {
            self.mqtt.port = 1883;
        }
        let prefix = self.mqtt.topic_prefix.trim().trim_matches('/');
        self.mqtt.topic_prefix = if prefix.is_empty() {
            MqttConfig::default().topic_prefix
        } else {
            prefix.to_string()
        };
        if self.mqtt.client_id.trim().is_empty() {
            self.mqtt.client_id = MqttConfig::default().client_id;
        }
        if self.web.port == 0 {
            self.web.port = WebConfig::default().port;
        }
    }

    /// Whether switching from `self` to `updated` only takes effect after a
    /// restart: transports, loop timing and anything the controller reads
    /// once at construction. Gains are tuned live and the setpoint is a
    /// boot value, so neither counts.
    pub fn restart_required(&self, updated: &DeviceConfig) -> bool {
        self.knx != updated.knx
            || self.mqtt != updated.mqtt
            || self.web != updated.web
            || self.send_interval_ms != updated.send_interval_ms
            || self.sensor_interval_ms != updated.sensor_interval_ms
            || self.loop_interval_ms != updated.loop_interval_ms
            || self.priority_timeout_ms != updated.priority_timeout_ms
            || self.pid.sample_interval_ms != updated.pid.sample_interval_ms
            || self.pid.min_output != updated.pid.min_output
            || self.pid.max_output != updated.pid.max_output
    }
}
