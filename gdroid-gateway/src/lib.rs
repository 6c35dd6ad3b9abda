//! # gdroid-gateway: device-control gateway service
//!
//! Exposes the device's capability groups (filesystem, packages, media,
//! device and network information, messaging, telephony, control) as RPC
//! services over framed TCP, and pushes live JPEG screen frames to
//! WebSocket viewers.
//!
//! ## Listeners
//!
//! - **RPC** (default port 9999): one [`gdroid_core::Service`] per group,
//!   bound from [`services::SERVICE_TABLE`].
//! - **Push** (default port 10000): `OK` handshake, then one binary
//!   message per encoded frame.

pub mod capture;
pub mod config;
pub mod context;
pub mod install;
pub mod provider;
pub mod push;
pub mod service;
pub mod services;
