//! Test suite for the block engine
//!
//! Tests are grouped by concern: block lifecycle, flow routing, timers and
//! descriptors, the command protocol, end-to-end scenarios and properties.
//! `example_blocks` holds the instrumented blocks they share.

#[cfg(test)]
mod integration;
#[cfg(test)]
mod property_tests;
