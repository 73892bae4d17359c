//! Byte-side transport for midipipe.
//!
//! Everything on the unstructured side of the bridge is a plain descriptor:
//! - [`ReadEnd`] / [`WriteEnd`]: owned, single-direction pipe ends
//! - [`ChildWiring`]: pipe pairs arranged onto a spawned child's fixed slots
//!
//! This is the lowest layer of midipipe. The codec and bridge crates only
//! ever see `Read` / `Write` implementations built here.

pub mod error;

#[cfg(unix)]
pub mod child;
#[cfg(unix)]
pub mod pipe;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use child::{dup_order, ChildSlots, ChildWiring, Directions, Dup, DupPlan, ParentEnds};
#[cfg(unix)]
pub use pipe::{adopt_shared, pipe, ReadEnd, WriteEnd};
