mod inner;
pub mod ring;
pub mod slab;

pub use ring::Ring;
pub use slab::Slab;
