#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod apn;
pub mod asynch;
pub mod command;
pub mod config;
pub mod error;
pub mod modules;
pub mod registration;
pub mod scan;
