pub mod api;
pub mod bus;
pub mod config;
pub mod control;
pub mod diagnostics;
pub mod influx;
pub mod light_state;
pub mod sensors;
pub mod startup_time;
pub mod surveillance;
