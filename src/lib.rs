//! couplet: serial implicit coupling scheme, Aitken under-relaxation and
//! two-level M2N messaging for partitioned multi-physics simulations.

pub mod acceleration;
pub mod com;
pub mod cplscheme;
pub mod error;
pub mod m2n;
pub mod mesh;
pub mod parallel;
pub mod utils;

// Re-exports for convenience
pub use acceleration::*;
pub use cplscheme::*;
pub use error::*;
pub use m2n::*;
pub use mesh::*;
pub use parallel::*;

// Re-export the transport contract at the crate root for convenience
pub use com::Communication;
