pub mod ensure;
pub mod newtype;
pub mod reservoir;
pub mod stopflag;

pub use stopflag::StopFlag;
