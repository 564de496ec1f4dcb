pub mod agreement;
pub mod spectral;
