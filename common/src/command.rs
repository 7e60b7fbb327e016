use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    state::{MAX_SETPOINT_C, MIN_SETPOINT_C, VALVE_CLOSED, VALVE_OPEN},
    types::ThermostatMode,
};

/// Where a command came from.
///
/// The declaration order is the arbitration priority: earlier variants win a
/// contested command inside the priority window.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandSource {
    Knx,
    Mqtt,
    WebApi,
    Internal,
}

impl CommandSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Knx => "KNX",
            Self::Mqtt => "MQTT",
            Self::WebApi => "WEB_API",
            Self::Internal => "INTERNAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandKind {
    SetTemperature,
    SetMode,
    SetValve,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetTemperature => "SET_TEMPERATURE",
            Self::SetMode => "SET_MODE",
            Self::SetValve => "SET_VALVE",
        }
    }

    /// Short name used in topic and route suffixes.
    pub fn from_name(name: &str) -> Result<Self, CommandError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "temperature" | "setpoint" | "set_temperature" => Ok(Self::SetTemperature),
            "mode" | "set_mode" => Ok(Self::SetMode),
            "valve" | "set_valve" => Ok(Self::SetValve),
            _ => Err(CommandError::UnknownKind(name.to_string())),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("unknown command type '{0}'")]
    UnknownKind(String),
    #[error("{kind} value is not a finite number")]
    NonFinite { kind: &'static str },
    #[error("{kind} value {value} outside {min}..={max}")]
    OutOfRange {
        kind: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },
    #[error("unknown thermostat mode '{0}'")]
    UnknownMode(String),
    #[error("malformed {kind} payload '{payload}'")]
    Malformed { kind: &'static str, payload: String },
}

/// A transient request to change the thermostat state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    pub source: CommandSource,
    pub kind: CommandKind,
    pub value: f32,
}

impl Command {
    /// Builds a command after checking the value against the unit range of
    /// its kind.
    pub fn new(source: CommandSource, kind: CommandKind, value: f32) -> Result<Self, CommandError> {
        if !value.is_finite() {
            return Err(CommandError::NonFinite {
                kind: kind.as_str(),
            });
        }

        match kind {
            CommandKind::SetTemperature => check_range(kind, value, MIN_SETPOINT_C, MAX_SETPOINT_C)?,
            CommandKind::SetValve => check_range(kind, value, VALVE_CLOSED, VALVE_OPEN)?,
            CommandKind::SetMode => {
                if ThermostatMode::from_value(value).is_none() {
                    return Err(CommandError::UnknownMode(value.to_string()));
                }
            }
        }

        Ok(Self {
            source,
            kind,
            value,
        })
    }

    pub fn set_temperature(source: CommandSource, celsius: f32) -> Result<Self, CommandError> {
        Self::new(source, CommandKind::SetTemperature, celsius)
    }

    pub fn set_mode(source: CommandSource, mode: ThermostatMode) -> Self {
        Self {
            source,
            kind: CommandKind::SetMode,
            value: mode.as_value(),
        }
    }

    pub fn set_valve(source: CommandSource, percent: f32) -> Result<Self, CommandError> {
        Self::new(source, CommandKind::SetValve, percent)
    }

    /// Parses a text payload (MQTT message, query parameter) into a command.
    /// Mode payloads may be a mode name or its numeric index.
    pub fn parse(source: CommandSource, kind: CommandKind, payload: &str) -> Result<Self, CommandError> {
        let trimmed = payload.trim();
        if kind == CommandKind::SetMode {
            return ThermostatMode::parse(trimmed)
                .map(|mode| Self::set_mode(source, mode))
                .ok_or_else(|| CommandError::UnknownMode(trimmed.to_string()));
        }

        let value = trimmed
            .parse::<f32>()
            .map_err(|_| CommandError::Malformed {
                kind: kind.as_str(),
                payload: trimmed.to_string(),
            })?;
        Self::new(source, kind, value)
    }

    pub fn mode(&self) -> Option<ThermostatMode> {
        match self.kind {
            CommandKind::SetMode => ThermostatMode::from_value(self.value),
            _ => None,
        }
    }
}

fn check_range(kind: CommandKind, value: f32, min: f32, max: f32) -> Result<(), CommandError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(CommandError::OutOfRange {
            kind: kind.as_str(),
            value,
            min,
            max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn source_order_is_priority_order() {
        assert!(CommandSource::Knx < CommandSource::Mqtt);
        assert!(CommandSource::Mqtt < CommandSource::WebApi);
        assert!(CommandSource::WebApi < CommandSource::Internal);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            Command::set_temperature(CommandSource::Mqtt, 60.0),
            Err(CommandError::OutOfRange { .. })
        ));
        assert!(matches!(
            Command::set_valve(CommandSource::Knx, 101.0),
            Err(CommandError::OutOfRange { .. })
        ));
        assert!(matches!(
            Command::new(CommandSource::Knx, CommandKind::SetMode, 9.0),
            Err(CommandError::UnknownMode(_))
        ));
        assert_eq!(
            Command::set_valve(CommandSource::Knx, f32::NAN),
            Err(CommandError::NonFinite { kind: "SET_VALVE" })
        );
    }

    #[test]
    fn parses_text_payloads() {
        let command = Command::parse(CommandSource::Mqtt, CommandKind::SetTemperature, " 21.5 ").unwrap();
        assert_eq!(command.value, 21.5);

        let command = Command::parse(CommandSource::Mqtt, CommandKind::SetMode, "eco").unwrap();
        assert_eq!(command.mode(), Some(ThermostatMode::Eco));

        assert!(matches!(
            Command::parse(CommandSource::Mqtt, CommandKind::SetValve, "half"),
            Err(CommandError::Malformed { .. })
        ));
        assert!(matches!(
            Command::parse(CommandSource::Mqtt, CommandKind::SetMode, "turbo"),
            Err(CommandError::UnknownMode(_))
        ));
    }

    #[test]
    fn kind_names_map_to_kinds() {
        assert_eq!(CommandKind::from_name("setpoint"), Ok(CommandKind::SetTemperature));
        assert_eq!(CommandKind::from_name("Valve"), Ok(CommandKind::SetValve));
        assert_eq!(
            CommandKind::from_name("fan"),
            Err(CommandError::UnknownKind("fan".to_string()))
        );
    }
}
