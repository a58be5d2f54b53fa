mod calibrate;
pub mod hot_pixels;
pub mod master;

pub use calibrate::calibrate;
pub use hot_pixels::{HotPixelIsolator, IsolatedPixels};
pub use master::{build_masters, master_calibration, ClassReport, MasterFrames, Reduction};
