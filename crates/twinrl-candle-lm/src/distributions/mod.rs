pub mod diagonal_distribution;

pub use diagonal_distribution::DiagGaussianDistribution;
