mod scenarios;

pub use stub_processor::*;
pub use stub_provider::*;
