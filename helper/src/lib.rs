#![doc = include_str!("../README.md")]

#[cfg(feature = "asynch")]
pub mod asynch;
#[cfg(feature = "timeout")]
pub mod debounce;
