pub mod unit;
pub mod integration;
pub mod helpers;
