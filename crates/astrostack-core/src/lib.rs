pub mod calibration;
pub mod consts;
pub mod error;
pub mod features;
pub mod filters;
pub mod frame;
pub mod io;
pub mod manifest;
pub mod pipeline;
pub mod register;
pub mod stack;
