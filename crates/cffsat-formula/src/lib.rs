//! Problem keys, CNF formulas and the cover-free family encoders.
//!
//! Everything here is pure and deterministic: no processes, no files.

pub mod design;
pub mod encode;
pub mod formula;
pub mod key;

pub use design::{blocks_from_witness, is_cover_free, Blocks};
pub use encode::{encode, EncodeError, Encoding};
pub use formula::{Clause, Formula, FormulaError, Witness};
pub use key::ProblemKey;
