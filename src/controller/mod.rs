pub mod clock;
pub mod rollout;
pub mod strategies;

pub use rollout::{run, Context, DeployConfig, DeployError};
