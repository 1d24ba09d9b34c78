//! Pluggable storage backend implementations.
//!
//! Each backend module provides a concrete type that implements
//! [`CsiIdentity`], [`CsiController`], and [`CsiNode`].
//!
//! [`CsiIdentity`]: crate::identity::CsiIdentity
//! [`CsiController`]: crate::controller::CsiController
//! [`CsiNode`]: crate::node::CsiNode

pub mod zfs;
