/// Access to the emulator's serialized state.
///
/// The ring only needs three operations from the host bridge, and keeping
/// them behind a trait lets tests drive the engine with a synthetic
/// emulator instead of a loaded core.
pub trait StateSource {
    /// Size in bytes of the serialized state, or `None` if the core does
    /// not support serialization right now.
    fn serialize_size(&mut self) -> Option<usize>;

    /// Serializes the current state into `out`, which is exactly
    /// [`serialize_size`](Self::serialize_size) bytes long.
    fn serialize(&mut self, out: &mut [u8]) -> bool;

    /// Replaces the emulator state with `data`.
    fn unserialize(&mut self, data: &[u8]) -> bool;
}
