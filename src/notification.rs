#![forbid(unsafe_code)]

// Synthetic sensor notifications emitted by every simulated device

use rand::Rng;
use serde_json::{json, Map, Value};

/// GPIO pins reported in every `gpio/int` state map.
pub const GPIO_PINS: [&str; 10] = ["0", "1", "2", "3", "4", "5", "12", "13", "14", "15"];

/// Upper bound (inclusive) of the `tick` field.
pub const MAX_TICK: u32 = i32::MAX as u32;

/// Number of `gpio/int` notifications following each `adc/int` one.
pub const GPIO_BURST: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Adc,
    Gpio,
}

impl NotificationKind {
    pub fn name(self) -> &'static str {
        match self {
            NotificationKind::Adc => "adc/int",
            NotificationKind::Gpio => "gpio/int",
        }
    }
}

/// One outbound notification: a name and its JSON parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub parameters: Value,
}

impl Notification {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Analog reading: `{"0": <float in [0,1) rounded to 4 places>}`.
    pub fn adc<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let reading = (rng.gen::<f64>() * 10_000.0).round() / 10_000.0;
        Self {
            kind: NotificationKind::Adc,
            parameters: json!({ "0": reading }),
        }
    }

    /// GPIO interrupt: which pin caused it, the state of every pin, and a tick.
    pub fn gpio<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let caused = rng.gen_range(1..=5u8).to_string();
        let state: Map<String, Value> = GPIO_PINS
            .iter()
            .map(|pin| (pin.to_string(), Value::from(rng.gen_range(0..=1u8))))
            .collect();
        let tick = rng.gen_range(0..=MAX_TICK);
        Self {
            kind: NotificationKind::Gpio,
            parameters: json!({
                "caused": [caused],
                "state": state,
                "tick": tick,
            }),
        }
    }

    pub fn generate<R: Rng + ?Sized>(kind: NotificationKind, rng: &mut R) -> Self {
        match kind {
            NotificationKind::Adc => Self::adc(rng),
            NotificationKind::Gpio => Self::gpio(rng),
        }
    }
}

/// Order of notifications within one emission cycle.
pub fn emission_cycle() -> impl Iterator<Item = NotificationKind> {
    std::iter::once(NotificationKind::Adc)
        .chain(std::iter::repeat(NotificationKind::Gpio).take(GPIO_BURST))
}
