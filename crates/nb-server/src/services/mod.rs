//! Outbound services

pub mod bilibili;

pub use bilibili::{BilibiliClient, BilibiliError};
