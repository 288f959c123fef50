pub mod sync;
pub mod util;
