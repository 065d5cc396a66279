//! Background work - module layout
//!
//! Structure:
//! - `processors`: the external cropping tool, image helpers, startup setup
//! - `orchestrator`: sequential batch runs with nested deadlines
//! - `batchers`: periodic jobs (preview retention sweep)

pub mod batchers;
pub mod orchestrator;
pub mod processors;
