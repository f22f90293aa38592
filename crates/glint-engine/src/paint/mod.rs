//! Color model shared by render objects and device backends.

mod color;

pub use color::Color;
