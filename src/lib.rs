//! Rust Quasi-Newton Library
//!
//! This library provides perceptron layers with hand-derived backpropagation
//! and a quasi-Newton (DFP/BFGS) training algorithm driven by a line search.
//!
//! # Modules
//!
//! - `layers`: Layer trait, perceptron and probabilistic layers, propagation buffers
//! - `network`: Layer chain, parameter layout and whole-network passes
//! - `loss`: Loss index contract and the sum squared error
//! - `optimizers`: Quasi-Newton method, learning-rate algorithm, training results
//! - `utils`: Tensor utilities, QR solve, RNG and the execution device
//! - `config`: Training configuration structures
//! - `error`: Crate error type

pub mod config;
pub mod error;
pub mod layers;
pub mod loss;
pub mod network;
pub mod optimizers;
pub mod utils;

pub use error::{Error, Result};
