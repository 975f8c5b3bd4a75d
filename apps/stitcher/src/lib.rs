//! # stitcher
//!
//! Library half of the `stitcher` binary: argument definitions and
//! command implementations, exposed so they can be tested directly.

pub mod cli;
