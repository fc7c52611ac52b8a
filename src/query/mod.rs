pub mod bins;
pub mod derived;
