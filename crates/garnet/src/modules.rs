//! Host-pluggable module interfaces.

pub mod cheevos;
