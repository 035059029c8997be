pub mod astro_util;
pub mod catalog;
pub mod clouds;
pub mod config;
pub mod environment;
pub mod night;
pub mod observability;
pub mod site;
pub mod sky_grid;
pub mod target;
pub mod weather;
pub mod wind_envelope;
