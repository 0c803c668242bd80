pub mod app;
pub mod seed;
