//! User-facing page rendering.

pub mod views;
