pub mod clock;
pub mod detector;
pub mod frame;
pub mod locator;
pub mod skin;
pub mod track;

pub use clock::{Clock, FixedClock, MonotonicClock};
pub use detector::{FaceDetector, SkinBoxDetector};
pub use frame::{ChannelMeans, ColorChannel, ColorSums, Frame, Rect};
pub use locator::{LocatorConfig, RegionLocator, RegionMode, RegionReport, RegionStatus};
pub use skin::CalibrationResult;
pub use track::FaceTrack;
