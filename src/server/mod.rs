pub mod acquisition;
pub mod dto;
pub mod management;
pub mod response;
mod router;
pub mod validation;

pub use router::{AppState, create_router};
