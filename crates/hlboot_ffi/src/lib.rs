//! Native entry point loaded by the host application.

mod api;

pub use api::{godot_gdnative_init, hlboot_version};
