// promptgate-prefilter/src/lib.rs
#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod automaton;
pub mod keywords;

pub use automaton::{KeywordHit, KeywordSet, KeywordSetError};
pub use keywords::DEFAULT_KEYWORDS;
