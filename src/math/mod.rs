pub mod groundtruth;
pub mod normalize;

pub use groundtruth::*;
pub use normalize::*;
