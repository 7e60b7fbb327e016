//! KNX side of the thermostat.
//!
//! Telegram encoding (datapoint types, cEMI framing) belongs to the bus
//! library behind [`KnxBus`]; this module only sees decoded group values and
//! maps them to commands and back.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    adapter::ProtocolAdapter,
    command::{Command, CommandKind, CommandSource},
    config::{ConfigError, KnxGroups},
    types::ThermostatMode,
};

/// Individual address of this device, `area.line.device`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhysicalAddress {
    pub area: u8,
    pub line: u8,
    pub device: u8,
}

impl PhysicalAddress {
    pub const fn new(area: u8, line: u8, device: u8) -> Self {
        Self { area, line, device }
    }
}

impl FromStr for PhysicalAddress {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::PhysicalAddress(raw.to_string());
        let [area, line, device] = split_three(raw, '.').ok_or_else(invalid)?;
        if area > 15 || line > 15 {
            return Err(invalid());
        }
        Ok(Self::new(area, line, device))
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.area, self.line, self.device)
    }
}

impl TryFrom<String> for PhysicalAddress {
    type Error = ConfigError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<PhysicalAddress> for String {
    fn from(address: PhysicalAddress) -> Self {
        address.to_string()
    }
}

/// Three-level group address, `main/middle/sub`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupAddress {
    pub main: u8,
    pub middle: u8,
    pub sub: u8,
}

impl GroupAddress {
    pub const fn new(main: u8, middle: u8, sub: u8) -> Self {
        Self { main, middle, sub }
    }
}

impl FromStr for GroupAddress {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::GroupAddress(raw.to_string());
        let [main, middle, sub] = split_three(raw, '/').ok_or_else(invalid)?;
        if main > 31 || middle > 7 {
            return Err(invalid());
        }
        Ok(Self::new(main, middle, sub))
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.main, self.middle, self.sub)
    }
}

impl TryFrom<String> for GroupAddress {
    type Error = ConfigError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<GroupAddress> for String {
    fn from(address: GroupAddress) -> Self {
        address.to_string()
    }
}

fn split_three(raw: &str, separator: char) -> Option<[u8; 3]> {
    let mut parts = raw.trim().split(separator);
    let mut out = [0u8; 3];
    for slot in &mut out {
        *slot = parts.next()?.trim().parse().ok()?;
    }
    parts.next().is_none().then_some(out)
}

/// A decoded group value travelling on the bus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupTelegram {
    pub address: GroupAddress,
    pub value: f32,
}

#[derive(Debug, Error)]
pub enum KnxError {
    #[error("KNX bus write to {address} failed: {reason}")]
    Write {
        address: GroupAddress,
        reason: String,
    },
}

/// Transport primitive provided by the KNX bus library.
pub trait KnxBus: Send {
    /// Next telegram received since the last call, if any. Never blocks.
    fn poll(&mut self) -> Option<GroupTelegram>;

    fn write(&mut self, telegram: GroupTelegram) -> Result<(), KnxError>;
}

pub struct KnxAdapter<B> {
    bus: B,
    groups: KnxGroups,
}

impl<B: KnxBus> KnxAdapter<B> {
    /// The bus is already bound to the device's physical address.
    pub fn new(bus: B, groups: KnxGroups) -> Self {
        Self { bus, groups }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn command_kind(&self, address: GroupAddress) -> Option<CommandKind> {
        if address == self.groups.setpoint_command {
            Some(CommandKind::SetTemperature)
        } else if address == self.groups.mode_command {
            Some(CommandKind::SetMode)
        } else if address == self.groups.valve_command {
            Some(CommandKind::SetValve)
        } else {
            None
        }
    }

    fn write(&mut self, address: GroupAddress, value: f32) {
        if let Err(err) = self.bus.write(GroupTelegram { address, value }) {
            warn!("{err}");
        }
    }
}

impl<B: KnxBus> ProtocolAdapter for KnxAdapter<B> {
    fn source(&self) -> CommandSource {
        CommandSource::Knx
    }

    fn receive_commands(&mut self, _now_ms: u64) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Some(telegram) = self.bus.poll() {
            let Some(kind) = self.command_kind(telegram.address) else {
                debug!("ignoring KNX telegram for {}", telegram.address);
                continue;
            };
            match Command::new(CommandSource::Knx, kind, telegram.value) {
                Ok(command) => commands.push(command),
                Err(err) => warn!("dropping KNX telegram on {}: {err}", telegram.address),
            }
        }
        commands
    }

    fn send_temperature(&mut self, celsius: f32) {
        self.write(self.groups.temperature_state, celsius);
    }

    fn send_setpoint(&mut self, celsius: f32) {
        self.write(self.groups.setpoint_state, celsius);
    }

    fn send_valve_position(&mut self, percent: f32) {
        self.write(self.groups.valve_state, percent);
    }

    fn send_mode(&mut self, mode: ThermostatMode) {
        self.write(self.groups.mode_state, mode.as_value());
    }

    fn send_heating_state(&mut self, heating: bool) {
        self.write(self.groups.heating_state, if heating { 1.0 } else { 0.0 });
    }
}
