use std::fs::File;
use std::io;

/// Changes the on-disk length of the file behind a stream.
///
/// The stream never decides how the file grows; it asks this collaborator
/// and then re-derives its slice table from the new length.
pub trait FileResize: Send {
    /// Sets the file length to `new_len` bytes.
    fn set_len(&mut self, new_len: u64) -> io::Result<()>;
}

impl FileResize for File {
    fn set_len(&mut self, new_len: u64) -> io::Result<()> {
        File::set_len(self, new_len)
    }
}

/// Adapts a closure into a [`FileResize`].
///
/// ```rust
/// use mmstream::{FileResize, ResizeFn};
///
/// let mut seen = Vec::new();
/// let mut op = ResizeFn(|n: u64| -> std::io::Result<()> {
///     seen.push(n);
///     Ok(())
/// });
/// op.set_len(42).unwrap();
/// drop(op);
/// assert_eq!(seen, vec![42]);
/// ```
pub struct ResizeFn<F>(pub F);

impl<F> FileResize for ResizeFn<F>
where
    F: FnMut(u64) -> io::Result<()> + Send,
{
    fn set_len(&mut self, new_len: u64) -> io::Result<()> {
        (self.0)(new_len)
    }
}

impl<F> std::fmt::Debug for ResizeFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResizeFn(..)")
    }
}
