pub mod arena;
pub mod handle;
