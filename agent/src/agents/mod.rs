//! Agent roles: each turns a prompt into steps, code, or IDE actions.

pub mod codegen;
pub mod cursor;
pub mod steps;
