use relnet_core::transport::Socket as TransportSocket;
use relnet_peer::PeerId;

use super::Host;
use crate::event_types::Event;

impl<S: TransportSocket> Host<S> {
    /// Pops peers off the dispatch queue until one yields an event.
    pub(super) fn dispatch_incoming_commands(&mut self) -> Option<Event> {
        while let Some(index) = self.ctx.dispatch_queue.pop_front() {
            let Some(peer) = self.peers.get_mut(index) else {
                continue;
            };
            if let Some(event) = peer.dispatch(&mut self.ctx) {
                return Some(Event::from_peer_event(PeerId(index), event));
            }
        }
        None
    }
}
