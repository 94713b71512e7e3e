//! Network-facing collaborators: resolver file handling, reachability
//! probing, and hardware address rotation.

pub mod dns;
pub mod identity;
pub mod probe;
