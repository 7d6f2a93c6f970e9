//! Retroframe - polling client for a Retroframe image server
//!
//! Connects to the server over TCP, asks for an image at a given resolution,
//! and hands the JSON metadata header plus the raw image stream to a
//! caller-supplied handler. A background schedule repeats this forever,
//! logging and skipping any cycle that fails.
//!
//! # Modules
//!
//! - [`protocol`] - Request framing and response header decoding
//! - [`image`] - Request and result types
//! - [`receiver`] - Collaborator traits and stock implementations
//! - [`refresh`] - The refresh loop
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use retroframe::{Dimension, DrainingHandler, RefreshLoop, ServerConfig};
//!
//! let rl = RefreshLoop::new(
//!     ServerConfig::new("frame.local", 8888),
//!     Arc::new(Dimension::new(800, 480)),
//!     Arc::new(Duration::from_secs(60)),
//!     Arc::new(DrainingHandler::new()),
//! );
//! rl.start().await;
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod image;
pub mod protocol;
pub mod receiver;
pub mod refresh;

pub use config::{Config, ImageConfig, RefreshConfig, ServerConfig};
pub use error::{Field, RefreshError};
pub use image::{Dimension, ImageAndMetadata, MEM_SIZE_KEY, Metadata};
pub use receiver::{DrainingHandler, ImageReceiver, ImageSizeProvider, ReceiveHandler, RefreshDelayProvider};
pub use refresh::RefreshLoop;
