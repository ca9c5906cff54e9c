//! Asset kinds that are created in a [`SoftwareContext`].

mod config;
mod context;
mod primitive;
mod shader;
mod texture;

pub use config::*;
pub use context::*;
pub use primitive::*;
pub use shader::*;
pub use texture::*;
