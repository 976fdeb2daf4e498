//! The vehicle state machine: command admission, command effects and the
//! periodic simulation drift applied by the broadcaster.
//!
//! Admission and mutation happen inside one `&mut self` call so a command is
//! checked and applied as a single critical section under the vehicle lock.

use log::info;
use rand::Rng;
use shared::{
    CommandType, VehicleState, BATTERY_COMMAND_MIN, BATTERY_DRAIN, BATTERY_SAFETY_STOP, SPEED_MAX,
    SPEED_STEP, TEMP_JITTER, TEMP_MAX, TEMP_MIN,
};
use std::fmt;

/// Business-rule refusal of a command. A normal negative outcome, surfaced
/// to the client as RESPONSE_ERROR with the reason text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRejected {
    BatteryTooLow,
    SpeedLimitReached,
    AlreadyStopped,
}

impl fmt::Display for CommandRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BatteryTooLow => write!(f, "Battery too low"),
            Self::SpeedLimitReached => write!(f, "Speed limit reached (100 km/h)"),
            Self::AlreadyStopped => write!(f, "Vehicle is already stopped"),
        }
    }
}

pub struct Vehicle {
    state: VehicleState,
}

impl Vehicle {
    pub fn new() -> Self {
        info!("Telemetry system initialized");
        Self {
            state: VehicleState::new(),
        }
    }

    pub fn with_state(state: VehicleState) -> Self {
        Self { state }
    }

    pub fn snapshot(&self) -> VehicleState {
        self.state
    }

    /// Checks admission and applies the command in one step, returning the
    /// resulting state. Admission order: battery floor first, then the
    /// speed ceiling/floor rules.
    pub fn execute(&mut self, command: CommandType) -> Result<VehicleState, CommandRejected> {
        self.check_admission(command)?;
        self.apply(command);
        Ok(self.state)
    }

    fn check_admission(&self, command: CommandType) -> Result<(), CommandRejected> {
        if self.state.battery < BATTERY_COMMAND_MIN {
            return Err(CommandRejected::BatteryTooLow);
        }
        if command == CommandType::SpeedUp && self.state.speed >= SPEED_MAX {
            return Err(CommandRejected::SpeedLimitReached);
        }
        if command == CommandType::SlowDown && self.state.speed <= 0.0 {
            return Err(CommandRejected::AlreadyStopped);
        }
        Ok(())
    }

    fn apply(&mut self, command: CommandType) {
        match command {
            CommandType::SpeedUp => {
                self.state.speed = (self.state.speed + SPEED_STEP).min(SPEED_MAX);
            }
            CommandType::SlowDown => {
                self.state.speed = (self.state.speed - SPEED_STEP).max(0.0);
            }
            CommandType::TurnLeft => {
                self.state.direction = self.state.direction.left();
            }
            CommandType::TurnRight => {
                self.state.direction = self.state.direction.right();
            }
            CommandType::Unknown => {}
        }
        self.state.is_moving = self.state.speed > 0.0;
    }

    /// One simulation step of passive drift, independent of command traffic:
    /// battery drains while moving, temperature takes a bounded random walk,
    /// and a nearly empty battery forces a safety stop.
    pub fn tick<R: Rng>(&mut self, rng: &mut R) {
        if self.state.is_moving && self.state.battery > 0.0 {
            self.state.battery = (self.state.battery - BATTERY_DRAIN).max(0.0);
        }

        let jitter = rng.gen_range(-TEMP_JITTER..=TEMP_JITTER);
        self.state.temperature = (self.state.temperature + jitter).clamp(TEMP_MIN, TEMP_MAX);

        if self.state.battery <= BATTERY_SAFETY_STOP {
            self.state.speed = 0.0;
            self.state.is_moving = false;
        }
    }
}

impl Default for Vehicle {
    fn default() -> Self {
        Self::new()
    }
}
