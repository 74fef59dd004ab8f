//! Interned resource addresses: maps compact [`AddressId`] values to [`ResourceAddress`]es.
//!
//! Built while nodes are registered so that identical addresses shared by many
//! nodes are stored once. Ids are translated back to addresses at load time.

use std::borrow::Borrow;

use rustc_hash::FxHashMap;

use crate::error::StreamingError;
use crate::request::ResourceAddress;

/// Compact index into an [`AddressTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AddressId(pub u32);

impl Borrow<str> for ResourceAddress {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

/// Dense address storage with O(1) lookup by id and by text.
#[derive(Debug, Default)]
pub struct AddressTable {
    /// `addresses[id.0]` is the address for `id`.
    addresses: Vec<ResourceAddress>,
    ids: FxHashMap<ResourceAddress, AddressId>,
}

impl AddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `address`, adding it if it is new.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::EmptyAddress`] for the empty string.
    pub fn intern(&mut self, address: &str) -> Result<AddressId, StreamingError> {
        if let Some(&id) = self.ids.get(address) {
            return Ok(id);
        }
        let address = ResourceAddress::new(address)?;
        let id = AddressId(self.addresses.len() as u32);
        self.ids.insert(address.clone(), id);
        self.addresses.push(address);
        Ok(id)
    }

    /// Returns the address for an id.
    ///
    /// # Panics
    ///
    /// Panics if `id` did not come from this table.
    pub fn get(&self, id: AddressId) -> &ResourceAddress {
        &self.addresses[id.0 as usize]
    }

    /// Number of distinct addresses.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}
