pub mod derivatives;
pub mod gaussian_blur;
pub mod sampling;

pub use gaussian_blur::gaussian_blur;
pub use sampling::{bilinear_sample, resize};
