pub mod monitor;
pub mod system;
