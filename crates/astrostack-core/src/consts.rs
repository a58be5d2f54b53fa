/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum frame count to use frame-level Rayon parallelism.
pub const PARALLEL_FRAME_THRESHOLD: usize = 4;

/// Largest value representable at the working bit depth.
pub const WORKING_MAX: u16 = u16::MAX;

/// Midpoint of the working range. Detection planes whose maximum sits below
/// this are rescaled before hot-pixel isolation.
pub const WORKING_MIDPOINT: u16 = 1 << 15;

/// 16-bit to 8-bit scale factor (65535 / 255).
pub const DOWNSAMPLE_SCALE: u16 = 257;

/// Peak height above which a pixel is treated as saturated (7/8 of full scale).
pub const HOT_PIXEL_THRESHOLD: u16 = (WORKING_MAX as u32 * 7 / 8) as u16;

/// Identity element for dark subtraction when no master dark exists.
pub const SUBTRACT_IDENTITY: f32 = 0.0;

/// Identity element for flat division when no master flat exists, and the
/// divisor used in place of zero flat pixels.
pub const DIVIDE_IDENTITY: f32 = 1.0;

/// Default fraction of sorted binary-descriptor matches kept for registration.
pub const DEFAULT_MATCH_FRACTION: f32 = 0.8;

/// Lowe ratio applied to SIFT nearest-neighbour matches.
pub const SIFT_RATIO_TEST: f32 = 0.6;

/// Minimum number of correspondences for a homography.
pub const MIN_HOMOGRAPHY_POINTS: usize = 4;

/// Default RANSAC reprojection threshold in pixels.
pub const DEFAULT_RANSAC_THRESHOLD: f64 = 3.0;

/// Default RANSAC iteration cap.
pub const DEFAULT_RANSAC_ITERATIONS: usize = 2000;

/// Default RANSAC confidence for adaptive early termination.
pub const DEFAULT_RANSAC_CONFIDENCE: f64 = 0.995;

/// Default RANSAC seed. Fixed so repeated runs produce identical stacks.
pub const DEFAULT_RANSAC_SEED: u64 = 0x5eed_a57e;

/// Homographies whose upper-left 2x2 determinant falls below this are rejected.
pub const MIN_HOMOGRAPHY_DETERMINANT: f64 = 1e-6;

/// ITU-R BT.601 luminance coefficient for the red channel.
pub const LUMINANCE_R: f32 = 0.299;

/// ITU-R BT.601 luminance coefficient for the green channel.
pub const LUMINANCE_G: f32 = 0.587;

/// ITU-R BT.601 luminance coefficient for the blue channel.
pub const LUMINANCE_B: f32 = 0.114;

/// Number of channels in a color frame (R, G, B).
pub const COLOR_CHANNEL_COUNT: usize = 3;

/// FITS logical record size in bytes.
pub const FITS_BLOCK_SIZE: usize = 2880;

/// FITS header card size in bytes.
pub const FITS_CARD_SIZE: usize = 80;
