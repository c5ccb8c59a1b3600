//! Simulated energy-system readings.
//!
//! The assistant only ever reads a [`TelemetrySnapshot`]; the simulator owns
//! the live values and nudges them on a timer.

use rand::Rng;
use serde::Serialize;

/// Current readings of the solar installation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    /// Photovoltaic output in kW.
    pub production: f64,
    /// Household draw in kW.
    pub consumption: f64,
    /// Battery charge, 0–100.
    pub battery_level: f64,
    /// Reservoir fill, 0–100.
    pub water_level: f64,
    pub pump_active: bool,
    /// Panel efficiency in percent.
    pub efficiency: f64,
    /// Overall health score in percent.
    pub system_health: f64,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            production: 6.2,
            consumption: 4.1,
            battery_level: 88.0,
            water_level: 75.0,
            pump_active: true,
            efficiency: 94.2,
            system_health: 96.0,
        }
    }
}

impl TelemetrySnapshot {
    /// Human-readable summary, one reading per line.
    pub fn display(&self) -> String {
        format!(
            "  Production:   {:.1} kW\n  \
             Consumption:  {:.1} kW\n  \
             Battery:      {}%\n  \
             Reservoir:    {}%\n  \
             Pump:         {}\n  \
             Efficiency:   {:.1}%\n  \
             Health:       {}%\n",
            self.production,
            self.consumption,
            self.battery_level.round(),
            self.water_level.round(),
            if self.pump_active { "on" } else { "off" },
            self.efficiency,
            self.system_health.round(),
        )
    }
}

/// Random walk over production, consumption and battery level.
pub struct TelemetrySimulator {
    snapshot: TelemetrySnapshot,
}

impl TelemetrySimulator {
    pub fn new(snapshot: TelemetrySnapshot) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &TelemetrySnapshot {
        &self.snapshot
    }

    /// Apply one round of jitter, keeping each reading within its range:
    /// production 0–10 kW, consumption >= 0, battery 10–100 %.
    pub fn tick(&mut self, rng: &mut impl Rng) {
        let s = &mut self.snapshot;
        s.production = (s.production + (rng.r#gen::<f64>() - 0.5) * 0.2).clamp(0.0, 10.0);
        s.consumption = (s.consumption + (rng.r#gen::<f64>() - 0.5) * 0.1).max(0.0);
        s.battery_level = (s.battery_level + (rng.r#gen::<f64>() - 0.5) * 0.5).clamp(10.0, 100.0);
    }
}
