//! Address resolver: decides whether an alert goes to a person or a room.
//!
//! Classification is a heuristic: anything containing `@` is treated as a
//! person's email address, everything else as a room id. Inputs are not
//! validated further; the messaging platform rejects unknown addresses and that
//! rejection flows through the normal dispatch retry path.
//!
//! A platform-internal person id (no `@`) is classified as a room. This is a
//! known limitation.

use zpark_common::types::Destination;

/// Destination classifier.
pub struct AddressResolver;

impl AddressResolver {
    /// Classify a raw `to` value.
    pub fn resolve(to: &str) -> Destination {
        if to.contains('@') {
            Destination::DirectMessage(to.to_string())
        } else {
            Destination::Room(to.to_string())
        }
    }
}
