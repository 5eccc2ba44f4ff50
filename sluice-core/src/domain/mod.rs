//! Domain models: nodes, their circuit breakers, request classification and routing results.

pub mod circuit;
pub mod node;
pub mod request;
pub mod routing;
