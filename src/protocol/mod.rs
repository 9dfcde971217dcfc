//! Protocol implementations.
//!
//! Each protocol is a marker type implementing
//! [`Protocol`](crate::kernel::Protocol) plus typed helper methods on
//! [`Kernel`](crate::kernel::Kernel) of that marker.

pub mod diy;
pub mod marklin_can;
