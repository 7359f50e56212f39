pub mod shared;

pub use shared::SharedResource;
