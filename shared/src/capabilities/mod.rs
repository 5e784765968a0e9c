mod host;
mod http;
mod realtime;
mod storage;

pub use self::http::{
    HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpResult, HttpTransport,
    ValidatedUrl,
};
pub use self::realtime::{
    Channel, ChannelId, ChannelScope, RealtimeError, RealtimeEvent, RealtimeEventKind,
    RealtimeTransport, TicketStatusChange,
};
pub use self::storage::{
    validate_path, ObjectMetadata, ObjectStorage, StorageError, StoredObject,
};

// Network, storage and realtime I/O run through the async transport traits
// above. A host-side `ViewStore` drives them directly; a native shell driving
// the Crux `App` instead receives each command as a `Host` effect.
pub use self::host::{Host, HostOperation};
pub use crux_core::render::Render;

use crate::event::Event;
use crate::App;

// Field types stay spelled out: the `Effect` derive names each variant after
// the capability type.
#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub host: Host<Event>,
    pub render: Render<Event>,
}
