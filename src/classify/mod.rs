pub mod scenario;
pub mod truth;
