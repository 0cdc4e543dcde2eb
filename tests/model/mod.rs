//! Model composition tests
//!
//! Evaluation, convolution, free-parameter layout, twins and position binding.

pub mod composition_tests;
pub mod position_tests;
