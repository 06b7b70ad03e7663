//! Ray Tracing 所需的加速结构

pub mod acceleration;
