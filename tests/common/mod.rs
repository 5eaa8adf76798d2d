#![allow(dead_code)]

pub mod assertions;
pub mod gated;
pub mod harness;
pub mod images;
