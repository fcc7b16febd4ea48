//! Client registration table (C3 / spec §3, §6).
//!
//! Multiple protocol stacks can share one controller, each registering an
//! EtherType (and optionally a MAC address prefix) it wants frames
//! dispatched for. Grounded in the teacher's small fixed-capacity
//! registration tables (e.g. `drivers/virtio/virtqueue`'s descriptor free
//! list) — linear scan over a small, bounded array rather than a heap
//! collection, since [`crate::MAX_CLIENTS`] is small and fixed.

use crate::error::Error;
use crate::frame::{DestinationClass, EtherType, MacAddress};
use crate::MAX_CLIENTS;

/// How broadly a registered client wants frames delivered (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    /// Only frames addressed to this station, matching the client's type.
    Direct,
    /// Broadcast frames matching the client's type.
    Broadcast,
    /// Multicast frames matching the client's type.
    Multicast,
    /// Every frame regardless of destination, matching the client's type.
    Promiscuous,
}

/// An opaque handle to one client registration, returned by
/// [`ClientTable::register`] and required by [`ClientTable::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHandle(u8);

/// One registration: the filter it was registered under plus the callback
/// to invoke on a match. The opaque "context" spec §3/§6 describes is
/// whatever the callback closure itself captures — idiomatic Rust has no
/// need for a separate `void *context` parameter the way a C packet driver
/// would.
struct Slot<'a> {
    ether_type: EtherType,
    mac_filter: Option<MacAddress>,
    mode: ClientMode,
    callback: Box<dyn FnMut(&[u8]) + 'a>,
}

/// A fixed-capacity table of registered clients (spec §3: "at least 8
/// simultaneous clients").
pub struct ClientTable<'a> {
    slots: [Option<Slot<'a>>; MAX_CLIENTS],
}

impl<'a> ClientTable<'a> {
    /// Builds an empty table.
    pub fn new() -> Self {
        ClientTable {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Registers a client for `ether_type` in `mode`, optionally narrowed
    /// to frames addressed to `mac_filter`, invoking `callback` with a
    /// received frame's raw bytes on every match (spec §3, §4.7 step 4c,
    /// §6's `register(ethertype, mac_filter?, mode, callback, context)`).
    /// Fails with [`Error::OutOfHandles`] once [`MAX_CLIENTS`]
    /// registrations are live.
    pub fn register(
        &mut self,
        ether_type: EtherType,
        mac_filter: Option<MacAddress>,
        mode: ClientMode,
        callback: impl FnMut(&[u8]) + 'a,
    ) -> Result<ClientHandle, Error> {
        let slot = self
            .slots
            .iter_mut()
            .position(|s| s.is_none())
            .ok_or(Error::OutOfHandles)?;
        self.slots[slot] = Some(Slot {
            ether_type,
            mac_filter,
            mode,
            callback: Box::new(callback),
        });
        Ok(ClientHandle(slot as u8))
    }

    /// Releases a previously registered client. A handle from a different
    /// table, or one already released, is silently ignored — matching the
    /// packet-driver convention that `unregister` on a stale handle is a
    /// no-op rather than an error.
    pub fn release(&mut self, handle: ClientHandle) {
        if let Some(slot) = self.slots.get_mut(handle.0 as usize) {
            *slot = None;
        }
    }

    /// True if every slot is released, used by detach to assert a clean
    /// shutdown (spec §4.9's zero-leak invariant extends to clients too).
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Invokes every registered client's callback whose `ether_type`,
    /// optional `mac_filter`, and `mode` match this frame, in registration
    /// order (spec §4.7 step 4c, P3), passing the raw frame bytes. Returns
    /// the handles invoked.
    pub fn dispatch(
        &mut self,
        ether_type: EtherType,
        class: DestinationClass,
        dest: MacAddress,
        buffer: &[u8],
    ) -> Vec<ClientHandle> {
        let mut invoked = Vec::new();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let Some(slot) = slot else { continue };
            if slot.ether_type != ether_type {
                continue;
            }
            if slot.mac_filter.is_some_and(|filter| filter != dest) {
                continue;
            }
            let matches = match slot.mode {
                ClientMode::Promiscuous => true,
                ClientMode::Direct => class == DestinationClass::ForUs,
                ClientMode::Broadcast => class == DestinationClass::Broadcast,
                ClientMode::Multicast => class == DestinationClass::Multicast,
            };
            if matches {
                (slot.callback)(buffer);
                invoked.push(ClientHandle(i as u8));
            }
        }
        invoked
    }
}

impl<'a> Default for ClientTable<'a> {
    fn default() -> Self {
        Self::new()
    }
}
