//! # pulse-core
//!
//! Foundation types shared by every Pulse crate:
//!
//! - **Frames**: the `Frame` wire envelope and its `FrameType` discriminator
//! - **Priorities**: `MessagePriority` ordering for the ingress queue
//! - **Branded IDs**: `ConnectionId`, `MessageId` newtypes for type safety
//! - **Errors**: `CoreError` hierarchy via `thiserror`

#![deny(unsafe_code)]

pub mod errors;
pub mod frames;
pub mod ids;
pub mod priority;

pub use errors::{CoreError, Result};
pub use frames::{Frame, FrameType, codes};
pub use ids::{ConnectionId, MessageId};
pub use priority::MessagePriority;
