#![allow(non_snake_case)]

pub mod BlockRule;
pub mod Visit;
