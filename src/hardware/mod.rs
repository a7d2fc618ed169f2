pub mod cse7766;
pub mod factory;
pub mod simulated;

pub use cse7766::{Cse7766Frame, Cse7766Meter, FrameError};
pub use factory::DeviceFactory;
