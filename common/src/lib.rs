#![deny(rust_2018_idioms)]

pub mod constants;
pub mod messages;
pub mod sync;
