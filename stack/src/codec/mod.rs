//! Wire codec (§4.1): DNS names, resource records, NBNS names, and the
//! comparison primitives used for tie-breaking and response matching.

pub mod name;
pub mod nbns;
pub mod rr;
