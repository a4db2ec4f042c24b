#[cfg(feature = "classifier-http")]
pub mod http;
pub mod stub;

#[cfg(feature = "classifier-http")]
pub use http::{HttpDynamicClassifier, HttpStaticClassifier};
pub use stub::{StubDynamicClassifier, StubStaticClassifier};
