#![warn(clippy::pedantic)]

pub mod config;
pub mod generation;
pub mod pen_tools;
