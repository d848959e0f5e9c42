//! Adapters turning configuration resources into the objects they select and
//! the resources they render

pub mod selector;
pub mod template;
