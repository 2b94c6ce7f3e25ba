//! Device-scoped id namespacing.
//!
//! Several installs of the app may share one recognition backend. To
//! keep their member ids from colliding, every id sent to the server is
//! namespaced by a per-install device id:
//! `server_id = device_id * 1_000_000 + local_id`. The encoding is
//! reversible as long as local ids stay below one million.

/// Width of the local-id namespace within a server id.
pub const NAMESPACE_BASE: i64 = 1_000_000;

/// Maps local member ids to server-side face ids and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMapper {
    device_id: i64,
}

impl IdMapper {
    /// Wrap a persisted device id. Generation and persistence of the id
    /// itself belong to the settings store.
    pub fn new(device_id: i64) -> Self {
        Self { device_id }
    }

    pub fn device_id(&self) -> i64 {
        self.device_id
    }

    /// Namespace a local member id for the server.
    ///
    /// Local ids at or above [`NAMESPACE_BASE`] would collide with the
    /// next device's namespace; the bound is asserted in debug builds.
    pub fn to_server_id(&self, local_id: i64) -> i64 {
        debug_assert!(
            (0..NAMESPACE_BASE).contains(&local_id),
            "local id {local_id} outside the namespace bound"
        );
        self.device_id * NAMESPACE_BASE + local_id
    }

    /// Extract the local member id from a server face id.
    pub fn from_server_id(server_id: i64) -> i64 {
        server_id % NAMESPACE_BASE
    }

    /// Extract the originating device id from a server face id.
    pub fn device_of(server_id: i64) -> i64 {
        server_id / NAMESPACE_BASE
    }

    /// Parse a wire-format (decimal string) server id down to its local
    /// member id. `None` for anything non-numeric; callers drop such
    /// entries rather than treating them as errors.
    pub fn local_id_from_wire(wire_id: &str) -> Option<i64> {
        wire_id.trim().parse::<i64>().ok().map(Self::from_server_id)
    }
}
