/// Trait for file content backing a mapping.
///
/// `number` is the stable identity the shared-frame registry is keyed by;
/// two handles with the same number denote the same file.
pub trait Node: Send + Sync {
    /// Stable identity of the file
    fn number(&self) -> u64;
    /// Current size in bytes
    fn size(&self) -> usize;
    /// Read at `offset` into `buf`; returns bytes read, short at end of file
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize;
}
