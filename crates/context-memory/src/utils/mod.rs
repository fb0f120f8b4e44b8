//! Utilities module - text processing shared by ranking and title derivation

pub mod text_utils;

pub use text_utils::TextUtils;
