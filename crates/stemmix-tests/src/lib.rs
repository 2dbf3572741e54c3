//! Integration test crate for stemmix.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! Every external tool is simulated by the fake runner except in the
//! ignored tests of `real_ffmpeg`, which need ffmpeg on `PATH`.

#[cfg(test)]
mod support;

#[cfg(test)]
mod pipeline;

#[cfg(test)]
mod fallbacks;

#[cfg(test)]
mod cache;

#[cfg(test)]
mod real_ffmpeg;
