//! A local newtype around a boxed [`ReadAt`] trait object.
//!
//! `dbguard-runner` decides, per storage location, whether the
//! downloaded object needs decrypting before an engine sees it; either
//! way the engine's restore path only wants "something I can read at
//! an offset" without caring which. A plain `Box<dyn ReadAt>` can't
//! itself implement `ReadAt` without a blanket impl upstream, so this
//! wraps it in a local type instead.

use positioned_io::ReadAt;

pub struct DynReadAt(pub Box<dyn ReadAt + Send + Sync>);

impl ReadAt for DynReadAt {
    fn read_at(&self, pos: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read_at(pos, buf)
    }
}
