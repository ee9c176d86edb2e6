//! One accepted connection: its plug, plus nothing else. Dispatch is
//! entirely request/response and keeps no session across ticks.

use dcache_proto::{AnyStream, Plug};

pub struct Client {
    pub plug: Plug<AnyStream>,
}

impl Client {
    pub fn new(plug: Plug<AnyStream>) -> Self {
        Client { plug }
    }
}
