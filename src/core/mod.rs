//! Core tensor algebra: softmax, normalisation and the routing contractions.

pub mod contraction;
pub mod norm;
pub mod softmax;
