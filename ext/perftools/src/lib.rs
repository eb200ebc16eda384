extern crate serde;
#[macro_use]
extern crate serde_derive;

#[cfg(feature = "ruby")]
mod ruby_init;

pub mod allocation_tracer;
pub mod configuration;
pub mod controller;
pub mod engine;
pub mod error;
pub mod fault_guard;
pub mod frame;
pub mod symbolizer;
pub mod walker;

#[cfg(feature = "ruby")]
mod cpu_profiler;
#[cfg(feature = "ruby")]
mod ruby_internal;
#[cfg(feature = "ruby")]
pub mod ruby_runtime;
#[cfg(feature = "ruby")]
mod util;

#[cfg(test)]
mod testing;
