mod extract;
mod stage;
mod transform;
mod warehouse;

pub use extract::*;
pub use stage::*;
pub use transform::*;
pub use warehouse::*;
