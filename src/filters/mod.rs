pub mod angle;
pub mod distance;
pub mod heading;
pub mod position;

pub use angle::{smooth_angle, AngleParams, AngleSmoother};
pub use distance::{DistanceEstimator, DistanceSample};
pub use heading::{circular_variance, HeadingArbiter, HeadingBuffer};
pub use position::{smooth, LastGood, PositionSmoother, Substitution};
