//! Catalog content.

pub mod vapp_template;

pub use vapp_template::VAppTemplate;
