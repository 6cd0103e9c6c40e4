pub mod differ;
#[allow(clippy::module_inception)]
pub mod fingerprint;
