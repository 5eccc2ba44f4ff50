//! Selection, feedback and retry machinery layered over the router.

pub mod adaptive;
pub mod ewma;
pub mod feedback;
pub mod retry;
pub mod selector;
