//! Core systems for Evalboard.
//!
//! This crate provides the reactive building blocks shared by the connection
//! and request layers:
//!
//! - **Signal/Slot System**: Type-safe observer lists for state changes
//! - **Property System**: Change-detecting value cells
//! - **Logging**: Target names for filtering `tracing` output
//!
//! # Signal/Slot Example
//!
//! ```
//! use evalboard_core::Signal;
//!
//! let status_changed = Signal::<bool>::new();
//!
//! let conn_id = status_changed.connect(|connected| {
//!     println!("Connected: {}", connected);
//! });
//!
//! status_changed.emit(true);
//! status_changed.disconnect(conn_id);
//! ```
//!
//! # Property Example
//!
//! ```
//! use evalboard_core::{Property, Signal};
//!
//! struct Badge {
//!     unread: Property<u32>,
//!     unread_changed: Signal<u32>,
//! }
//!
//! impl Badge {
//!     fn bump(&self) {
//!         let next = self.unread.get() + 1;
//!         if self.unread.set(next) {
//!             self.unread_changed.emit(next);
//!         }
//!     }
//! }
//!
//! let badge = Badge { unread: Property::new(0), unread_changed: Signal::new() };
//! badge.bump();
//! assert_eq!(badge.unread.get(), 1);
//! ```

pub mod logging;
pub mod property;
pub mod signal;

pub use property::Property;
pub use signal::{ConnectionId, Signal};
