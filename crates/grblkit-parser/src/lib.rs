//! # grblkit parser
//!
//! G-Code preprocessing for the streaming driver. Every line passes
//! through a [`Preprocessor`] before it is transmitted: comment and
//! whitespace cleanup, `#n` variable substitution and dynamic feed
//! override. The trait is the seam between the streamer and whatever
//! preprocessing the embedding application wants to plug in.

pub mod preprocessor;

pub use preprocessor::{GcodePreprocessor, PreprocessError, Preprocessor};
