pub mod process;
pub mod stub;

pub use process::{ProcessConfig, ProcessExtractor};
pub use stub::StubExtractor;
