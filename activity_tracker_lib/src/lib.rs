pub mod location_sample;
pub mod session;
pub mod activity;
pub mod api;
