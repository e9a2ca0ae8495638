//! Wire data model for the flowline pipeline service.
//! One canonical field-name table shared by every driver: PascalCase in
//! JSON, snake_case in memory.

pub mod decoration;
pub mod message;
pub mod receive;

pub use {
    decoration::{Decoration, merge_decorations},
    message::{CODE_COMPLETED, CODE_FAILED, Event, MessageEnvelope, RouteLog},
    receive::{ReceiveOptions, ReceiveOptionsPatch},
};
