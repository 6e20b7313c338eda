pub mod airpay;
pub mod gateway;
pub mod razorpay;
pub mod service;

pub use gateway::{GatewayKind, Gateways};
pub use service::PaymentService;
