//! Binary format decoders.

pub mod elf;
