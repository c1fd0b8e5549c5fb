pub mod availability;
pub mod coupon;
pub mod engine;
pub mod error;
pub mod fit;
pub mod hours;
pub mod pricing;
pub mod session;
pub mod steps;
