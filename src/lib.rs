pub mod config;
pub mod dataset;
pub mod detector;
pub mod image;
pub mod landmark;
pub mod my_types;
pub mod one_euro;
pub mod optical_flow;
pub mod pyramid;
pub mod sim;
pub mod tracker;
pub mod visualization;
