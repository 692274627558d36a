//! Algorithm implementations for matched observational studies

pub mod matching;
