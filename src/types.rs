use std::fmt;

use crate::{Error, Result};

/// Lowest target the heaters accept, also used as the "off" setpoint.
pub const MIN_TEMPERATURE: f64 = 5.0;
pub const MAX_TEMPERATURE: f64 = 35.0;

/// Temperature stored as Celsius internally.
/// The cloud API speaks integer hundredths of a degree.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Temperature(f64);

impl Temperature {
    pub fn from_celsius(c: f64) -> Self {
        Self(c)
    }

    /// Construct from a wire value in hundredths of a degree.
    pub fn from_hundredths(raw: f64) -> Self {
        Self(raw / 100.0)
    }

    pub fn celsius(&self) -> f64 {
        self.0
    }

    /// Hundredths of a degree, truncated toward zero.
    pub fn to_hundredths(&self) -> i64 {
        (self.0 * 100.0) as i64
    }

    /// Wire form for the control endpoint: hundredths as a decimal string.
    pub fn to_wire(&self) -> String {
        self.to_hundredths().to_string()
    }

    /// Reject setpoints the heaters refuse.
    pub fn validate(self) -> Result<Self> {
        if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&self.0) {
            return Err(Error::InvalidTemperature {
                value: self.0,
                min: MIN_TEMPERATURE,
                max: MAX_TEMPERATURE,
            });
        }
        Ok(self)
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}\u{00b0}C", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeatingMode {
    Heat,
    Off,
}

impl HeatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeatingMode::Heat => "heat",
            HeatingMode::Off => "off",
        }
    }

    pub fn is_heating(&self) -> bool {
        matches!(self, HeatingMode::Heat)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Room {
    pub id: u64,
    pub home_id: u64,
    pub name: String,
    pub heating_enabled: bool,
    pub target_temperature: Temperature,
    pub temperature: Temperature,
}

impl Room {
    /// Stable identifier across homes: `"{home_id}_{id}"`.
    pub fn unique_id(&self) -> String {
        format!("{}_{}", self.home_id, self.id)
    }

    pub fn mode(&self) -> HeatingMode {
        if self.heating_enabled {
            HeatingMode::Heat
        } else {
            HeatingMode::Off
        }
    }
}

/// Observable state of the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePhase {
    #[default]
    Idle,
    /// Entries merged, a task will be scheduled.
    Pending,
    /// A task is sleeping out the debounce delay.
    Debouncing,
    /// A control request is on the wire.
    Writing,
}

/// Events emitted when the room cache changes.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    RoomAdded { room_id: u64, name: String },
    RoomRemoved { room_id: u64, name: String },
    TemperatureChanged { room_id: u64, name: String, temp: Temperature },
    TargetChanged { room_id: u64, name: String, target: Temperature },
    HeatingChanged { room_id: u64, name: String, enabled: bool },
}

impl RoomEvent {
    pub fn room_id(&self) -> u64 {
        match self {
            RoomEvent::RoomAdded { room_id, .. }
            | RoomEvent::RoomRemoved { room_id, .. }
            | RoomEvent::TemperatureChanged { room_id, .. }
            | RoomEvent::TargetChanged { room_id, .. }
            | RoomEvent::HeatingChanged { room_id, .. } => *room_id,
        }
    }
}
