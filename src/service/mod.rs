pub mod billing;
pub mod consumption;
