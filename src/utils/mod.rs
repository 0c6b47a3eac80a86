//! Small shared helpers

pub mod throttle;

pub use throttle::LogThrottler;
