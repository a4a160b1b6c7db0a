//! Scaling decisions from windowed utilization samples
//!
//! The engine owns one `SampleWindow` per configured metric of a service and
//! turns sustained threshold breaches into `ScalingIntent`s, with debounce on
//! both directions and hysteresis against single-sample spikes.

mod decision;
mod window;

pub use decision::{DecisionEngine, EngineState};
pub use window::SampleWindow;
