mod domains;
mod location;
mod pipeline;
mod utils;

pub use domains::*;
pub use location::*;
pub use pipeline::*;
pub use utils::*;
