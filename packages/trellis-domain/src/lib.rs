pub mod access;
pub mod duplicates;
pub mod identity;
