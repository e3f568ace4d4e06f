//! Strategy used when sandboxing is administratively disabled.

pub mod pool;
