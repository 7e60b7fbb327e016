use crate::types::{StatusSnapshot, ThermostatMode, ThermostatStatus};

pub const DEFAULT_TEMPERATURE_C: f32 = 21.0;
pub const DEFAULT_HUMIDITY_PCT: f32 = 50.0;
pub const DEFAULT_PRESSURE_HPA: f32 = 1013.25;

pub const MIN_SETPOINT_C: f32 = 5.0;
pub const MAX_SETPOINT_C: f32 = 35.0;

pub const VALVE_CLOSED: f32 = 0.0;
pub const VALVE_OPEN: f32 = 100.0;

/// Canonical thermostat record.
///
/// Every setter guards its own field: out-of-range values are clamped and
/// non-finite values are refused, leaving the field untouched. Setters never
/// notify anyone; telling the protocols about a change is the protocol
/// manager's job.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermostatState {
    mode: ThermostatMode,
    target_temperature: f32,
    current_temperature: f32,
    current_humidity: f32,
    current_pressure: f32,
    valve_position: f32,
    enabled: bool,
    status: ThermostatStatus,
}

impl Default for ThermostatState {
    fn default() -> Self {
        Self {
            mode: ThermostatMode::Comfort,
            target_temperature: DEFAULT_TEMPERATURE_C,
            current_temperature: DEFAULT_TEMPERATURE_C,
            current_humidity: DEFAULT_HUMIDITY_PCT,
            current_pressure: DEFAULT_PRESSURE_HPA,
            valve_position: VALVE_CLOSED,
            enabled: true,
            status: ThermostatStatus::Ok,
        }
    }
}

impl ThermostatState {
    pub fn with_setpoint(target_temperature: f32) -> Self {
        let mut state = Self::default();
        state.set_target_temperature(target_temperature);
        state
    }

    pub fn mode(&self) -> ThermostatMode {
        self.mode
    }

    pub fn target_temperature(&self) -> f32 {
        self.target_temperature
    }

    pub fn current_temperature(&self) -> f32 {
        self.current_temperature
    }

    pub fn current_humidity(&self) -> f32 {
        self.current_humidity
    }

    pub fn current_pressure(&self) -> f32 {
        self.current_pressure
    }

    pub fn valve_position(&self) -> f32 {
        self.valve_position
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_heating(&self) -> bool {
        self.valve_position > VALVE_CLOSED
    }

    pub fn status(&self) -> ThermostatStatus {
        self.status
    }

    pub fn set_mode(&mut self, mode: ThermostatMode) {
        self.mode = mode;
    }

    pub fn set_target_temperature(&mut self, celsius: f32) -> bool {
        if !celsius.is_finite() {
            return false;
        }
        self.target_temperature = celsius.clamp(MIN_SETPOINT_C, MAX_SETPOINT_C);
        true
    }

    pub fn set_current_temperature(&mut self, celsius: f32) -> bool {
        set_finite(&mut self.current_temperature, celsius)
    }

    pub fn set_current_humidity(&mut self, percent: f32) -> bool {
        if !percent.is_finite() {
            return false;
        }
        self.current_humidity = percent.clamp(0.0, 100.0);
        true
    }

    pub fn set_current_pressure(&mut self, hpa: f32) -> bool {
        set_finite(&mut self.current_pressure, hpa)
    }

    pub fn set_valve_position(&mut self, percent: f32) -> bool {
        if !percent.is_finite() {
            return false;
        }
        self.valve_position = percent.clamp(VALVE_CLOSED, VALVE_OPEN);
        true
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_status(&mut self, status: ThermostatStatus) {
        self.status = status;
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            temperature: self.current_temperature,
            humidity: self.current_humidity,
            pressure: self.current_pressure,
            setpoint: self.target_temperature,
            enabled: self.enabled,
            error: self.status,
            mode: self.mode,
            valve: self.valve_position,
        }
    }
}

fn set_finite(field: &mut f32, value: f32) -> bool {
    if value.is_finite() {
        *field = value;
        true
    } else {
        false
    }
}
