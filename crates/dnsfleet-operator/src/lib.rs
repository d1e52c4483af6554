pub mod clock;
pub mod error;
pub mod k8s;
pub mod operator;
pub mod params;
pub mod store;

pub use operator::operator;
