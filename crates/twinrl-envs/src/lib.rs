pub mod pendulum;
pub mod point_mass;
pub mod wrappers;

pub use pendulum::Pendulum;
pub use point_mass::PointMass;
pub use wrappers::{
    normalized::{NormalizedEnv, SharedObsStats},
    time_limit::TimeLimit,
};
