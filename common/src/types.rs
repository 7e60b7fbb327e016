use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThermostatMode {
    Off,
    Comfort,
    Eco,
    Away,
    Boost,
    Antifreeze,
}

impl ThermostatMode {
    pub const ALL: [ThermostatMode; 6] = [
        Self::Off,
        Self::Comfort,
        Self::Eco,
        Self::Away,
        Self::Boost,
        Self::Antifreeze,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Comfort => "COMFORT",
            Self::Eco => "ECO",
            Self::Away => "AWAY",
            Self::Boost => "BOOST",
            Self::Antifreeze => "ANTIFREEZE",
        }
    }

    /// Numeric index used on value-typed transports (KNX, command values).
    pub fn index(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Comfort => 1,
            Self::Eco => 2,
            Self::Away => 3,
            Self::Boost => 4,
            Self::Antifreeze => 5,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(usize::from(index)).copied()
    }

    /// Maps a command value onto a mode. Only whole, in-range values map.
    pub fn from_value(value: f32) -> Option<Self> {
        if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > 255.0 {
            return None;
        }
        Self::from_index(value as u8)
    }

    pub fn as_value(self) -> f32 {
        f32::from(self.index())
    }

    /// Accepts a mode name in any case, or its numeric index.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if let Some(mode) = Self::ALL
            .iter()
            .copied()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(trimmed))
        {
            return Some(mode);
        }
        trimmed.parse::<u8>().ok().and_then(Self::from_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThermostatStatus {
    Ok,
    SensorError,
    ControlError,
}

impl ThermostatStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::SensorError => "SENSOR_ERROR",
            Self::ControlError => "CONTROL_ERROR",
        }
    }
}

/// Read-only projection of the thermostat state served to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: f32,
    pub setpoint: f32,
    pub enabled: bool,
    pub error: ThermostatStatus,
    pub mode: ThermostatMode,
    pub valve: f32,
}
