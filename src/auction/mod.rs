pub mod engine;
pub mod model;
pub mod round;
pub mod views;

pub use engine::Transition;
