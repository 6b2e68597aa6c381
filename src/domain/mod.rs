pub mod codec;
pub mod entities;
pub mod errors;
pub mod group;
pub mod repositories;
pub mod services;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use group::*;
pub use repositories::*;
pub use services::*;
pub use value_objects::*;
