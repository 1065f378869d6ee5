//! Data loading toolkit for liver injury grading models.
//!
//! The crate covers the data half of a classifier training program: a
//! stratified train/validation splitter and a streaming batch pipeline
//! with decode, resize, normalize, shuffle, batch, augmentation and
//! prefetch stages. Model definition, optimization and persistence belong
//! to the consuming training loop.

mod common;
pub mod config;
pub mod dataset;
pub mod error;
pub mod processor;
pub mod split;
pub mod stream;
