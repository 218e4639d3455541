mod barrier;
mod connecter;

pub use barrier::Barrier;
pub use connecter::{Connecter, RemoteRegion};
pub(crate) use connecter::{connect_until_success, listen_on};
