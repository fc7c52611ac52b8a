pub mod artifact;
pub mod codec;
pub mod compression;
pub mod constants;
pub mod error;
pub mod pack;
