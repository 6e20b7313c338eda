pub mod code;
pub mod plan;
pub mod replica;

pub use replica::{DailyAuction, DailySlot};
