/// Endpoint registry: a fixed number of slots addressed by stable indices
use crate::core::Endpoint;
use crate::error::{ResilisError, ResilisResult};

/// Default number of endpoint slots per client
pub const DEFAULT_CAPACITY: usize = 16;

/// Fixed-capacity set of candidate endpoints plus the round-robin cursor
/// pointing at the endpoint currently in use.
///
/// Removing an endpoint leaves its slot empty; indices of the remaining
/// endpoints never change.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    slots: Vec<Option<Endpoint>>,
    current: Option<usize>,
}

impl EndpointRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            current: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Insert into the first free slot and return its index
    pub fn add(&mut self, endpoint: Endpoint) -> ResilisResult<usize> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(ResilisError::CapacityExhausted {
                capacity: self.capacity(),
            })?;

        tracing::debug!("Registered endpoint {} at slot {}", endpoint, index);
        self.slots[index] = Some(endpoint);
        Ok(index)
    }

    /// Remove the endpoint at `index`, returning it
    pub fn remove(&mut self, index: usize) -> ResilisResult<Endpoint> {
        self.slots
            .get_mut(index)
            .and_then(Option::take)
            .ok_or(ResilisError::EndpointNotFound { index })
    }

    /// Remove every endpoint and forget the current index
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.current = None;
    }

    pub fn get(&self, index: usize) -> Option<&Endpoint> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Occupied slots in index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Endpoint)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|endpoint| (index, endpoint)))
    }

    /// Index of the endpoint in use (or last tried)
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn set_current(&mut self, index: usize) {
        self.current = Some(index);
    }

    /// Move the cursor one slot forward, wrapping around.
    ///
    /// Starts at slot 0 when no endpoint was tried yet. Returns the new index
    /// when that slot is occupied, `None` for an empty slot.
    pub fn advance(&mut self) -> Option<usize> {
        let capacity = self.capacity();
        if capacity == 0 {
            return None;
        }

        let next = self.current.map_or(0, |index| (index + 1) % capacity);
        self.current = Some(next);
        self.slots[next].as_ref().map(|_| next)
    }

    /// Look up an endpoint by address, registering it when unknown.
    ///
    /// A new entry copies the timeouts of the endpoint at `reference` and
    /// becomes the current index, so the next reconnect prefers it.
    pub fn find_or_create(
        &mut self,
        host: &str,
        port: u16,
        reference: usize,
    ) -> ResilisResult<usize> {
        if let Some((index, _)) = self.iter().find(|(_, endpoint)| endpoint.matches(host, port)) {
            return Ok(index);
        }

        let (connect_timeout, operation_timeout) = self
            .get(reference)
            .map(|endpoint| (endpoint.connect_timeout, endpoint.operation_timeout))
            .unwrap_or((None, None));

        let index = self.add(
            Endpoint::new(host, port).with_timeouts(connect_timeout, operation_timeout),
        )?;
        self.current = Some(index);
        Ok(index)
    }

    pub fn record_success(&mut self, index: usize) {
        if let Some(endpoint) = self.slots.get_mut(index).and_then(Option::as_mut) {
            endpoint.success_count = endpoint.success_count.saturating_add(1);
        }
    }

    pub fn record_failure(&mut self, index: usize) {
        if let Some(endpoint) = self.slots.get_mut(index).and_then(Option::as_mut) {
            endpoint.failure_count = endpoint.failure_count.saturating_add(1);
        }
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
