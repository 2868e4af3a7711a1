mod cache;
mod error;
mod file;
mod pool;
mod random;
mod sorter;
mod utils;

pub use cache::*;
pub use error::{*};
pub use file::*;
pub use pool::*;
pub use random::*;
pub use sorter::*;
