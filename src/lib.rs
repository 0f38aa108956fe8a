//! anteprima: a preview build service for reStructuredText projects.
//!
//! Rendering and linting are delegated to external processes (Sphinx,
//! docutils, doc8-style linters); the service's own job is to serialize
//! those builds behind a single-slot debounced admission gate, post-process
//! the generated HTML, and always hand the caller HTML — rendered content or
//! a diagnostic error page, never a propagated failure.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
