// HTTP routes
pub mod extract;
pub mod health;
pub mod results;
pub mod stream;

pub use extract::*;
pub use health::*;
pub use results::*;
pub use stream::*;
