pub mod scanner;
pub mod scheduler;

pub use scanner::{CycleReport, ScanSnapshot, Scanner, ScannerSettings};
pub use scheduler::{ScanScheduler, ScannerStatus};
