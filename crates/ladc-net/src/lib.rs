//! Wire message codec, encrypted UDP peer endpoint, bulk sync and the
//! control dispatcher that ties them to [`ladc_core::Engine`] (spec
//! §4.6-§4.8).

pub mod dispatch;
pub mod message;
pub mod peer;
pub mod sync;

pub use dispatch::{Dispatcher, Origin};
pub use message::{Message, MessageError, Verb};
pub use peer::{parse_peer, PeerEndpoint};
pub use sync::SyncManager;
