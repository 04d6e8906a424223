pub mod reconcile;
pub mod report;
pub mod status;
pub mod traffic;
pub mod validation;

// Re-export everything so strategies import from one place
pub use reconcile::*;
pub use report::*;
pub use status::*;
pub use traffic::*;
pub use validation::*;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Tests can use unwrap/expect for brevity
#[path = "rollout_test.rs"]
mod tests;
