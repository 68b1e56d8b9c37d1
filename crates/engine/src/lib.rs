//! Pure alert-shaping logic: destination classification and message composition.

pub mod composer;
pub mod resolver;
