pub mod algorithm;
pub mod cache;
pub mod derived_data;
pub mod device;
pub mod sensor_data;
pub mod timesync;
