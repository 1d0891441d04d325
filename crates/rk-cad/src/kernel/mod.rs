//! CAD kernel abstraction
//!
//! The naming layer talks to geometry only through [`CadKernel`].
//! [`PolyKernel`] is the built-in reference implementation.

mod poly;
mod traits;

pub use poly::PolyKernel;
pub use traits::*;
