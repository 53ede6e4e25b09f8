mod bss;
mod dump;

pub use bss::BssStore;
