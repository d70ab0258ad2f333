//! The `utils` module provides the pieces shared by every other module:
//! the crate wide error value and logging setup.

pub mod error;
pub mod logging;

#[cfg(test)]
mod tests;
