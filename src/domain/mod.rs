pub mod order;
pub mod position;
pub mod regime;

pub use order::*;
pub use position::*;
pub use regime::*;
