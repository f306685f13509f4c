#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
pub mod classify;
pub mod explain;
pub mod intake;
pub mod quality;
pub mod reference;
pub mod types;
pub mod zscore;

#[path = "../forecast/mod.rs"]
pub mod forecast;
