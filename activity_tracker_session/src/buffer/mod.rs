pub mod buffer;
pub mod uplink;

pub use buffer::*;
pub use uplink::*;
