pub mod evaluation;
pub mod materials;
pub mod persona;
pub mod transcript;
