//! Trove Declarations
//!
//! Turns a run's initial and final arrangements into a composition of
//! distinct artifacts, and the composition plus the performance window into
//! the canonical provenance declaration that gets signed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod composition;
pub mod declaration;
pub mod error;
pub mod mime;

pub use composition::{Artifact, Composition, CompositionFingerprinter, Locus};
pub use declaration::{Declaration, DeclarationBuilder, Performance};
pub use error::{DeclarationError, DeclarationResult};
pub use mime::{InferSniffer, MimeSniffer};
