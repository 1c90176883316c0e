pub mod battery;
pub mod decision;
pub mod forecast;

pub use battery::*;
pub use decision::*;
pub use forecast::*;
