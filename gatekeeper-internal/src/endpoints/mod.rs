pub mod greeting;
pub mod stream;
