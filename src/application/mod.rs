pub mod consumer;
pub mod dto;
pub mod use_cases;

pub use consumer::*;
pub use dto::*;
pub use use_cases::*;
