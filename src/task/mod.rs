//! Task modules
//! Background tasks running next to the wake cycle

pub mod network;

pub use network::{NET_STACK, RadioLink, WifiPeripherals, radio_driver};
