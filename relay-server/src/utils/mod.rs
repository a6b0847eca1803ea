mod api;
mod pool;
mod reconcile;
mod split;

pub use self::api::*;
pub use self::pool::*;
pub use self::reconcile::*;
pub use self::split::*;
