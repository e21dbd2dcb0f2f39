pub mod analysis;
pub mod enums;
pub mod findings;
pub mod request;

pub use analysis::*;
pub use enums::*;
pub use findings::*;
pub use request::*;
